mod env;
mod registry;
mod tracing;

pub use registry::init_binding;

pub async fn init_base() {
    env::init_env().await;
    tracing::init_tracing().await;
}
