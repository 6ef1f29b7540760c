mod end_to_end_test;
mod filter_test;
mod index_consistency_test;
mod recovery_test;
mod transaction_test;
mod unique_test;
