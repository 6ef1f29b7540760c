use logjam::bson::Bson;
use logjam::doc;
use logjam::errors::LogjamResult;
use logjam::storage::{Storage, KEY_FIELD};
use std::collections::BTreeSet;
use logjam_int_test::test_util::{cleanup, create_test_context, run_test};

/// Keys of stored documents whose `field` satisfies `matches`, read from
/// the primary store only.
fn scan(storage: &Storage, field: &str, matches: impl Fn(&Bson) -> bool) -> LogjamResult<BTreeSet<u64>> {
    let mut keys = BTreeSet::new();
    for document in storage.all()?.items::<Bson>()? {
        if let Some(value) = document.get_path(field) {
            if matches(value) {
                keys.insert(document.nav(KEY_FIELD)?.as_u64());
            }
        }
    }
    Ok(keys)
}

fn verify(storage: &Storage) -> LogjamResult<()> {
    for name in ["ann", "bob", "cid"] {
        let expected = scan(storage, "name", |v| v.as_string() == name)?;
        assert_eq!(storage.filter("name", name)?.keys(), &expected, "name {}", name);
    }
    for word in ["red", "blue", "green"] {
        let expected = scan(storage, "tags", |v| v.as_set().contains(word))?;
        assert_eq!(storage.tagged("tags", word)?.keys(), &expected, "tag {}", word);
    }
    for term in ["rust", "go"] {
        let expected = scan(storage, "bio", |v| v.as_string().to_lowercase().contains(term))?;
        assert_eq!(storage.search("bio", term)?.keys(), &expected, "term {}", term);
    }
    for age in [20, 30] {
        let expected = scan(storage, "age", |v| v.as_i32() == age)?;
        assert_eq!(storage.filter("age", age)?.keys(), &expected, "age {}", age);
    }
    Ok(())
}

#[test]
fn test_indexes_follow_every_write() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let mut ann = doc! { "name" => "ann", "age" => 20, "tags" => vec!["red"], "bio" => "Writes Rust" };
            let mut bob = doc! { "name" => "bob", "age" => 30, "tags" => vec!["red", "blue"], "bio" => "Go and Rust" };
            let mut cid = doc! { "name" => "cid", "age" => 20, "tags" => vec!["green"] };

            storage.place(&mut ann)?;
            verify(&storage)?;
            storage.place(&mut bob)?;
            verify(&storage)?;
            storage.place(&mut cid)?;
            verify(&storage)?;

            bob.set_child("name", Bson::from("cid"));
            bob.set_child("tags", Bson::from(vec!["green"]));
            bob.set_child("age", Bson::from(20));
            storage.place(&mut bob)?;
            verify(&storage)?;

            ann.remove_child("bio");
            ann.nav_mut("tags").push_child(Bson::from("blue"));
            storage.place(&mut ann)?;
            verify(&storage)?;

            storage.remove(&mut cid)?;
            verify(&storage)?;
            storage.remove(&mut ann)?;
            verify(&storage)?;

            assert_eq!(storage.all()?.keys(), &BTreeSet::from([2]));
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_rebuild_matches_incremental_indexes() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            for (name, tag) in [("ann", "red"), ("bob", "blue"), ("cid", "red")] {
                let mut user = doc! { "name" => name, "tags" => vec![tag], "bio" => "rust" };
                storage.place(&mut user)?;
            }
            let before = storage.tagged("tags", "red")?.keys().clone();

            storage.rebuild()?;
            verify(&storage)?;
            assert_eq!(storage.tagged("tags", "red")?.keys(), &before);
            Ok(())
        },
        cleanup,
    );
}
