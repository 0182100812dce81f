use aws_sdk_dynamodb::types::AttributeValue;
use content_api::{
    models::Content,
    repository::{ContentRepository, InMemoryRepository, RepositoryError, item_to_content},
};
use std::{collections::HashMap, sync::Arc};

#[tokio::test]
async fn test_create_then_get_returns_exact_record() {
    let repo = InMemoryRepository::default();
    let created = repo
        .create_content(Content::new("a", "Alpha"))
        .await
        .unwrap();
    assert_eq!(created, Content::new("a", "Alpha"));
    assert_eq!(repo.get_content("a").await.unwrap(), created);
}

#[tokio::test]
async fn test_duplicate_create_leaves_original() {
    let repo = InMemoryRepository::with_seed([Content::new("1", "Content 1")]);
    let result = repo.create_content(Content::new("1", "Replacement")).await;

    assert_eq!(result, Err(RepositoryError::AlreadyExists));
    assert_eq!(repo.get_content("1").await.unwrap().name, "Content 1");
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let repo = InMemoryRepository::with_seed([Content::new("1", "Content 1")]);
    repo.delete_content("1").await.unwrap();

    assert_eq!(repo.get_content("1").await, Err(RepositoryError::NotFound));
    assert_eq!(repo.delete_content("1").await, Err(RepositoryError::NotFound));
}

#[tokio::test]
async fn test_list_is_sorted_regardless_of_insertion_order() {
    let repo = InMemoryRepository::default();
    for id in ["c", "a", "d", "b"] {
        repo.create_content(Content::new(id, id.to_uppercase()))
            .await
            .unwrap();
    }

    let ids: Vec<String> = repo
        .list_content()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_update_round_trip_and_idempotence() {
    let repo = InMemoryRepository::with_seed([Content::new("1", "Content 1")]);

    let first = repo.update_content("1", "X").await.unwrap();
    let second = repo.update_content("1", "X").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(repo.get_content("1").await.unwrap().name, "X");

    assert_eq!(
        repo.update_content("missing", "X").await,
        Err(RepositoryError::NotFound)
    );
}

#[tokio::test]
async fn test_returned_values_are_copies() {
    let repo = InMemoryRepository::with_seed([Content::new("1", "Content 1")]);
    let mut fetched = repo.get_content("1").await.unwrap();
    fetched.name = "mutated".to_string();

    assert_eq!(repo.get_content("1").await.unwrap().name, "Content 1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_have_exactly_one_winner() {
    let repo = Arc::new(InMemoryRepository::default());

    let handles: Vec<_> = (0..32)
        .map(|n| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.create_content(Content::new("shared", format!("writer {n}")))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e, RepositoryError::AlreadyExists),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(repo.list_content().await.unwrap().len(), 1);
}

#[test]
fn test_item_to_content_requires_string_attributes() {
    let item = HashMap::from([
        ("id".to_string(), AttributeValue::S("7".to_string())),
        ("name".to_string(), AttributeValue::S("Seven".to_string())),
    ]);
    assert_eq!(item_to_content(&item).unwrap(), Content::new("7", "Seven"));

    let missing = HashMap::from([("id".to_string(), AttributeValue::S("7".to_string()))]);
    assert!(matches!(
        item_to_content(&missing),
        Err(RepositoryError::Backend(_))
    ));

    let wrong_type = HashMap::from([
        ("id".to_string(), AttributeValue::N("7".to_string())),
        ("name".to_string(), AttributeValue::S("Seven".to_string())),
    ]);
    assert!(item_to_content(&wrong_type).is_err());
}
