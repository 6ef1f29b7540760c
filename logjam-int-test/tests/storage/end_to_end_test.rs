use logjam::bson::Bson;
use logjam::doc;
use logjam::storage::{IndexKind, StorageConfigBuilder, KEY_FIELD};
use logjam::store::CompareMode;
use logjam_int_test::test_util::{cleanup, create_context_with, run_test};

fn jason_config() -> StorageConfigBuilder {
    StorageConfigBuilder::new("person")
        .add_index(IndexKind::Tree, "name", CompareMode::Lex)
        .add_index(IndexKind::Tag, "tags", CompareMode::Lex)
        .add_unique("name")
}

#[test]
fn test_place_query_remove() {
    run_test(
        || create_context_with(jason_config()),
        |ctx| {
            let storage = ctx.storage();
            let mut jason = doc! { "name" => "Jason", "tags" => vec!["a", "b"] };
            storage.place(&mut jason)?;
            let key = jason.nav(KEY_FIELD)?.as_u64();
            assert_ne!(key, 0);

            let by_name = storage.filter("name", "Jason")?;
            assert_eq!(by_name.size(), 1);
            let mut found = Bson::default();
            assert!(by_name.first(&mut found)?);
            assert_eq!(found, jason);

            let by_tag = storage.tagged("tags", "a")?;
            assert_eq!(by_tag.size(), 1);
            assert!(by_tag.contains(key));

            storage.remove(&mut jason)?;
            assert!(storage.filter("name", "Jason")?.is_empty());
            assert!(storage.tagged("tags", "a")?.is_empty());
            assert!(!storage.at(key)?.exists());
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_stored_document_keeps_structure() {
    run_test(
        || create_context_with(jason_config()),
        |ctx| {
            let storage = ctx.storage();
            let mut person = doc! {
                "name" => "Ada",
                "tags" => vec!["math"],
                "score" => 9.5,
                "active" => true,
                "visits" => 12i64,
            };
            person.nav_mut("address/city").value("London");
            person.set_child("nothing", Bson::Null);
            storage.place(&mut person)?;

            let key = person.nav(KEY_FIELD)?.as_u64();
            let stored = storage.at(key)?;
            assert_eq!(stored, person);
            assert_eq!(stored.nav("address/city")?.as_string(), "London");
            assert_eq!(stored.nav("score")?.as_f64(), 9.5);
            assert!(stored.nav("active")?.as_bool());
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_reopen_keeps_documents_and_indexes() {
    run_test(
        || create_context_with(jason_config()),
        |ctx| {
            let storage = ctx.storage();
            let mut jason = doc! { "name" => "Jason", "tags" => vec!["a"] };
            let mut mary = doc! { "name" => "Mary", "tags" => vec!["a", "c"] };
            storage.place(&mut jason)?;
            storage.place(&mut mary)?;

            let reopened = ctx.reopen()?;
            assert_eq!(reopened.count()?, 2);
            assert_eq!(reopened.tagged("tags", "a")?.size(), 2);
            assert_eq!(reopened.filter("name", "Mary")?.items::<Bson>()?, vec![mary]);

            let mut bob = doc! { "name" => "Bob" };
            reopened.place(&mut bob)?;
            assert_eq!(bob.nav(KEY_FIELD)?.as_u64(), 3);
            reopened.close()?;
            Ok(())
        },
        cleanup,
    );
}
