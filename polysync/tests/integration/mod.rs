mod capture_test;
mod context_test;
mod federated_test;
mod postgres_test;
mod processor_test;
mod reconciliation_test;
mod saga_test;
mod sync_test;
