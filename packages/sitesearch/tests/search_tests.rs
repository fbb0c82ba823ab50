//! Integration tests for the query path: index a fixture site, then search
//! it through [`SearchService`].

use std::sync::Arc;

use sitesearch::testing::{docs_site, page_html, MockFetcher};
use sitesearch::{
    Indexer, IndexerSettings, Keys, LandingPage, MemoryEngine, QueryBuilder, SearchRequest,
    SearchService, SiteConfiguration, SynonymGroup,
};

const ROOT: &str = "https://docs.example.com";
const ROOT_ALIAS: &str = "test:https://docs.example.com";

async fn indexed(site: Arc<SiteConfiguration>, fetcher: MockFetcher) -> Arc<MemoryEngine> {
    let engine = Arc::new(MemoryEngine::new());
    let indexer = Indexer::new(
        engine.clone(),
        engine.clone(),
        Arc::new(fetcher),
        Keys::new("test"),
        IndexerSettings::default(),
    );
    let outcome = indexer.run(site, true).await.unwrap();
    assert!(outcome.promoted());
    engine
}

fn docs() -> SiteConfiguration {
    SiteConfiguration::new(ROOT).with_content_selector(".main-content")
}

fn service(engine: Arc<MemoryEngine>, site: Arc<SiteConfiguration>) -> SearchService {
    SearchService::new(engine, Keys::new("test"), vec![site], ROOT).unwrap()
}

#[tokio::test]
async fn test_search_returns_shaped_results() {
    let site = Arc::new(docs());
    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine, site);

    let response = service.search(&SearchRequest::new("replicas")).await;

    assert_eq!(response.total, 2);
    let section = response
        .results
        .iter()
        .find(|result| result.section_title == "Replication")
        .unwrap();
    assert_eq!(section.title, "Clustering");
    assert_eq!(section.url, format!("{}/concepts/clustering", ROOT));
    // Pages crawl concurrently, so the parent may or may not be known yet
    assert_eq!(section.hierarchy.last().map(String::as_str), Some("Clustering"));
    assert!(section.body.starts_with("<b>Replicas</b>"));
}

#[tokio::test]
async fn test_section_of_current_page_ranks_first() {
    let site = Arc::new(docs());
    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine, site);

    let anywhere = service.search(&SearchRequest::new("cluster")).await;
    let from_installing = service
        .search(&SearchRequest::new("cluster").from_url(format!("{}/installing/", ROOT)))
        .await;

    assert_eq!(anywhere.results[0].title, "Clustering");
    assert_eq!(from_installing.total, anywhere.total);
    assert_eq!(from_installing.results[0].title, "Installing");
    assert_eq!(from_installing.results[1].title, "Installing");
}

#[tokio::test]
async fn test_literal_terms_survive_escaping() {
    let site = Arc::new(docs().with_literal_term("active-active"));
    let fetcher = MockFetcher::new().with_page(
        ROOT,
        page_html(
            "Geo Replication",
            "Active-Active databases replicate writes across regions.",
            &[],
            &[],
        ),
    );
    let engine = indexed(site.clone(), fetcher).await;

    // Indexed text carries the same escaping as the query
    let generation = engine.alias_target(ROOT_ALIAS).unwrap();
    let bodies: Vec<String> = engine
        .record_keys(&format!("{}:doc:", generation))
        .iter()
        .filter_map(|key| engine.record(key))
        .filter_map(|record| record.get("body").cloned())
        .collect();
    assert!(!bodies.is_empty());
    assert!(bodies.iter().all(|body| body.contains(r"Active\-Active")));

    let builder = QueryBuilder::new(site.clone());
    assert_eq!(
        builder.expression("Active-Active [setup]", None).render(),
        r"Active\-Active  setup"
    );

    let service = service(engine, site);
    let response = service.search(&SearchRequest::new("active-active")).await;
    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].title, "Geo Replication");
}

#[tokio::test]
async fn test_synonym_prefix_becomes_exact_match() {
    let site = Arc::new(docs().with_synonym_group(SynonymGroup::new(
        "replication",
        ["replication", "mirroring"],
    )));
    let engine = indexed(site.clone(), docs_site(ROOT)).await;

    let builder = QueryBuilder::new(site.clone());
    assert_eq!(builder.expression("mirroring*", None).render(), "mirroring");
    assert_eq!(builder.expression("shard*", None).render(), "shard*");

    let service = service(engine, site);
    let response = service.search(&SearchRequest::new("mirroring*")).await;
    assert!(response
        .results
        .iter()
        .any(|result| result.section_title.contains("Replication")));
}

#[tokio::test]
async fn test_landing_page_is_pinned_first() {
    let site = Arc::new(docs().with_landing_page(
        "Clustering",
        LandingPage {
            title: "Clustering".to_string(),
            section_title: String::new(),
            hierarchy: vec!["Concepts".to_string()],
            body: "Everything about running a cluster.".to_string(),
            url: "concepts/clustering".to_string(),
        },
    ));
    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine, site);

    let response = service.search(&SearchRequest::new(" clustering ")).await;

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].url, format!("{}/concepts/clustering", ROOT));
    assert_eq!(response.results[0].body, "Everything about running a cluster.");
}

#[tokio::test]
async fn test_paging_and_empty_query() {
    let site = Arc::new(docs());
    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine, site);

    let page = service
        .search(&SearchRequest::new("cluster").paging(1, 1))
        .await;
    assert_eq!(page.results.len(), 1);
    assert!(page.total > 1);

    let empty = service.search(&SearchRequest::new("   ")).await;
    assert_eq!(empty.total, 0);
    assert!(empty.results.is_empty());
}

#[tokio::test]
async fn test_engine_failure_yields_empty_response() {
    let site = Arc::new(docs());
    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine.clone(), site);

    engine.set_available(false);
    let response = service.search(&SearchRequest::new("cluster")).await;

    assert_eq!(response.total, 0);
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_health_checks_engine_and_default_index() {
    let site = Arc::new(docs());
    let engine = Arc::new(MemoryEngine::new());
    let before = service(engine.clone(), site.clone()).health().await;
    assert!(before.engine);
    assert!(!before.default_index);

    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine.clone(), site);
    assert!(service.health().await.healthy());

    engine.set_available(false);
    assert!(!service.health().await.engine);
}

#[tokio::test]
async fn test_unknown_site_falls_back_to_default() {
    let site = Arc::new(docs());
    let engine = indexed(site.clone(), docs_site(ROOT)).await;
    let service = service(engine, site);

    let response = service
        .search(&SearchRequest::new("shards").site("https://unknown.example.com"))
        .await;

    assert!(response.total > 0);
    assert!(SearchService::new(
        Arc::new(MemoryEngine::new()),
        Keys::new("test"),
        Vec::new(),
        ROOT
    )
    .is_err());
}
