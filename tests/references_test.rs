mod helpers;

use helpers::{audit_rows, count, grant, http_caller, test_service};
use knowledge_service::error::KnowledgeError;
use knowledge_service::knowledge::types::{Caller, Channel};
use knowledge_service::service::{KnowledgeService, NewReference, ReferenceQuery};

fn reference(title: &str, url: &str, tags: &[&str], tier: Option<u32>) -> NewReference {
    NewReference {
        title: title.into(),
        url: url.into(),
        note: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        tier,
    }
}

async fn curator(service: &KnowledgeService) -> Caller {
    grant(service, "curator@example.com", 2).await;
    http_caller("curator@example.com")
}

#[tokio::test]
async fn malformed_url_is_rejected() {
    let service = test_service();
    let caller = curator(&service).await;

    for url in ["not a url", "ftp://files.example.com/x", "mailto:me@example.com"] {
        let err = service
            .add_reference(&caller, reference("Bad", url, &[], None))
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Validation { .. }), "{url}");
    }
    assert_eq!(count(&service, "refs"), 0);
}

#[tokio::test]
async fn adding_requires_tier_one() {
    let service = test_service();

    let err = service
        .add_reference(
            &Caller::anonymous(Channel::Http),
            reference("Rust book", "https://doc.rust-lang.org/book/", &["rust"], None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::Forbidden { required: 1, actual: 0 }));

    grant(&service, "dev@example.com", 1).await;
    let added = service
        .add_reference(
            &http_caller("dev@example.com"),
            reference("Rust book", "https://doc.rust-lang.org/book/", &["rust"], None),
        )
        .await
        .unwrap();
    assert_eq!(added.tier, 0);
    assert_eq!(added.created_at, added.updated_at);

    let rows = audit_rows(&service);
    let adds: Vec<_> = rows.iter().filter(|r| r.0 == "add_reference").collect();
    assert_eq!(adds.len(), 2);
    assert_eq!(adds[0].1, "anonymous");
    assert_eq!(adds[0].2, "error");
    assert_eq!(adds[1].2, "ok");
}

#[tokio::test]
async fn listing_is_tier_gated_and_newest_first() {
    let service = test_service();
    let caller = curator(&service).await;
    service
        .add_reference(&caller, reference("Public A", "https://a.example.com", &["web"], None))
        .await
        .unwrap();
    service
        .add_reference(&caller, reference("Private", "https://b.example.com", &["web"], Some(2)))
        .await
        .unwrap();
    service
        .add_reference(&caller, reference("Public C", "https://c.example.com", &["db"], None))
        .await
        .unwrap();

    let public = service
        .list_references(&http_caller("dev@example.com"), ReferenceQuery::default())
        .await
        .unwrap();
    let titles: Vec<_> = public.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, ["Public C", "Public A"]);

    let all = service.list_references(&caller, ReferenceQuery::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let limited = service
        .list_references(&caller, ReferenceQuery { tags: vec![], limit: Some(1) })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].title, "Public C");

    let err = service
        .list_references(&caller, ReferenceQuery { tags: vec![], limit: Some(0) })
        .await
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::InvalidArgument(_)));
}

#[tokio::test]
async fn find_by_tag_matches_whole_tags() {
    let service = test_service();
    let caller = curator(&service).await;
    service
        .add_reference(&caller, reference("SQLite docs", "https://sqlite.org/docs.html", &["db", "sqlite"], None))
        .await
        .unwrap();
    service
        .add_reference(&caller, reference("Postgres docs", "https://postgresql.org/docs/", &["dbms"], None))
        .await
        .unwrap();

    let found = service.find_references_by_tag(&caller, "DB").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "SQLite docs");

    let err = service.find_references_by_tag(&caller, "  ").await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Validation { .. }));
}

#[tokio::test]
async fn duplicate_links_are_separate_rows() {
    let service = test_service();
    let caller = curator(&service).await;
    let a = service
        .add_reference(&caller, reference("Same", "https://same.example.com", &[], None))
        .await
        .unwrap();
    let b = service
        .add_reference(&caller, reference("Same", "https://same.example.com", &[], None))
        .await
        .unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(count(&service, "refs"), 2);
}
