use logjam::bson::Bson;
use logjam::doc;
use logjam::errors::LogjamResult;
use logjam::storage::{Operation, Storage};
use logjam_int_test::test_util::{cleanup, create_test_context, run_test};
use std::collections::BTreeSet;

fn seed(storage: &Storage) -> LogjamResult<()> {
    let users = vec![
        doc! { "name" => "ann", "age" => 25, "tags" => vec!["admin", "ops"], "bio" => "Rust and databases" },
        doc! { "name" => "bob", "age" => 31, "tags" => vec!["ops"], "bio" => "Kernel hacker" },
        doc! { "name" => "cid", "age" => 42, "tags" => vec!["admin"], "bio" => "Writes rust compilers" },
        doc! { "name" => "dee", "age" => 19, "tags" => vec!["intern"] },
    ];
    for mut user in users {
        storage.place(&mut user)?;
    }
    Ok(())
}

fn names(storage: &Storage, keys: &BTreeSet<u64>) -> LogjamResult<Vec<String>> {
    let mut result = Vec::new();
    for key in keys {
        result.push(storage.at(*key)?.nav("name")?.as_string());
    }
    Ok(result)
}

#[test]
fn test_all_and_none() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            seed(&storage)?;
            let all = storage.all()?;
            assert_eq!(all.size(), 4);

            let nothing = all.clone().operate(Operation::Intersection, &storage.none());
            assert!(nothing.is_empty());
            let everything = storage.none().operate(Operation::Union, &all);
            assert_eq!(everything.keys(), all.keys());
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_union_keys_size() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            seed(&storage)?;
            let admins = storage.tagged("tags", "admin")?;
            let ops = storage.tagged("tags", "ops")?;
            let expected: BTreeSet<u64> = admins.keys().union(ops.keys()).copied().collect();

            let combined = admins.union_keys(ops.keys());
            assert_eq!(combined.size(), expected.len());
            assert_eq!(names(&storage, combined.keys())?, vec!["ann", "bob", "cid"]);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_chained_refinement() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            seed(&storage)?;

            let rusty_admins = storage.tagged("tags", "admin")?.search("bio", "rust")?;
            assert_eq!(names(&storage, rusty_admins.keys())?, vec!["ann", "cid"]);

            let older = rusty_admins.greater("age", 30)?;
            assert_eq!(names(&storage, older.keys())?, vec!["cid"]);

            let young_or_ops = storage
                .all()?
                .lesser("age", 20)?
                .set_operation(Operation::Union)
                .tagged("tags", "ops")?;
            assert_eq!(names(&storage, young_or_ops.keys())?, vec!["ann", "bob", "dee"]);

            let not_ops = storage
                .all()?
                .set_operation(Operation::Complement)
                .tagged("tags", "ops")?;
            assert_eq!(names(&storage, not_ops.keys())?, vec!["cid", "dee"]);

            let exactly_one = storage
                .tagged("tags", "admin")?
                .set_operation(Operation::SymmetricDifference)
                .tagged("tags", "ops")?;
            assert_eq!(names(&storage, exactly_one.keys())?, vec!["bob", "cid"]);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_items_decode_lazily() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            seed(&storage)?;
            let ops = storage.tagged("tags", "ops")?;

            let mut bob = storage.filter("name", "bob")?.items::<Bson>()?.remove(0);
            storage.remove(&mut bob)?;

            let remaining = ops.items::<Bson>()?;
            assert_eq!(remaining.len(), 1);
            assert_eq!(remaining[0].nav("name")?.as_string(), "ann");

            let all_names: Vec<String> = storage.all()?.items::<Bson>()?
                .iter()
                .map(|user| user.nav("name").map(|n| n.as_string()))
                .collect::<LogjamResult<_>>()?;
            assert_eq!(all_names, vec!["ann", "cid", "dee"]);

            let mut untouched = doc! { "name" => "placeholder" };
            assert!(!storage.filter("name", "nobody")?.first(&mut untouched)?);
            assert_eq!(untouched.nav("name")?.as_string(), "placeholder");
            Ok(())
        },
        cleanup,
    );
}
