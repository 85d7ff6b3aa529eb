pub mod api_handler;
pub mod backend_executor;
pub mod encryption;
pub mod export;
pub mod federated_executor;
pub mod health_handler;
pub mod memory_store;
pub mod metrics_handler;
pub mod registry;
pub mod sql_guard;
pub mod sqlx_connector;
pub mod type_adapters;
pub mod worker_pool;

#[cfg(test)]
mod federated_executor_test;
#[cfg(test)]
pub(crate) mod test_support;
