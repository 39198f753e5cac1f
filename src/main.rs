use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt as _};

use crate::ansible::{Composer, InventoryBuilder, render_host, render_inventory};
use crate::cache::{InventoryCache, cache_key};
use crate::config::{InventoryConfig, verify_file};
use crate::error::InventoryError;
use crate::kubevirt::{
    ClientFactory, FetchedData, KubeClientFactory, fetch_objects, populate_inventory,
};
use crate::options::PluginOptions;

mod ansible;
mod cache;
mod config;
mod error;
mod kubevirt;
mod options;
mod utils;

/// Ansible dynamic inventory for KubeVirt virtual machines.
#[derive(Parser, Debug)]
#[command(name = "kubevirt-inventory")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the whole inventory. This is the default.
    #[arg(long, conflicts_with = "host")]
    list: bool,

    /// Print the variables of a single host.
    #[arg(long, value_name = "HOSTNAME")]
    host: Option<String>,

    /// Inventory file, its name must end in kubevirt.yml or kubevirt.yaml.
    #[arg(
        long,
        short,
        env = "KUBEVIRT_INVENTORY_CONFIG",
        required_unless_present = "schema"
    )]
    config: Option<PathBuf>,

    /// Ignore cached data and fetch from the cluster.
    #[arg(long)]
    refresh_cache: bool,

    /// Print the JSON schema of the inventory file.
    #[arg(long)]
    schema: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.schema {
        let schema = schemars::schema_for!(InventoryConfig);
        return match serde_json::to_string_pretty(&schema) {
            Ok(schema) => {
                println!("{schema}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    setup_tracing();

    match run(&args).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
    {
        eprintln!("tracing-subscriber setup failed: {e}");
    }
}

async fn run(args: &Args) -> Result<String, InventoryError> {
    let config_path = args.config.as_deref().ok_or_else(|| {
        InventoryError::InvalidConfig("No inventory file given, use --config".into())
    })?;
    verify_file(config_path)?;

    let contents = std::fs::read_to_string(config_path)?;
    let options = InventoryConfig::parse(&contents)?.into_options(|name| std::env::var(name).ok())?;
    let composer = Composer::new(options.compose.clone())?;

    let cache = options.cache.enabled.then(|| {
        let key = cache_key(&options.cache.prefix, config_path, &contents);
        InventoryCache::new(&options.cache, &key)
    });

    let data = load_data(&KubeClientFactory, &options, cache.as_ref(), args.refresh_cache).await?;

    let mut inventory = InventoryBuilder::new();
    populate_inventory(&mut inventory, &data, &options.inventory, &composer)?;

    match &args.host {
        Some(host) => Ok(render_host(&inventory, host)?),
        None => Ok(render_inventory(&inventory)?),
    }
}

/// Serves the fetched data from the cache when possible, otherwise fetches it from the cluster
/// and refreshes the cache.
async fn load_data(
    factory: &impl ClientFactory,
    options: &PluginOptions,
    cache: Option<&InventoryCache>,
    refresh: bool,
) -> Result<FetchedData, InventoryError> {
    if !refresh {
        if let Some(data) = cache.and_then(|cache| cache.load(Utc::now())) {
            info!("Using cached inventory data");
            return Ok(data);
        }
    }

    let client = factory
        .connect(&options.connection)
        .await
        .map_err(InventoryError::ClientSetup)?;

    let data = fetch_objects(&client, &options.inventory).await?;

    if let Some(cache) = cache {
        cache.store(&data, Utc::now())?;
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;
    use crate::kubevirt::{ClientError, fetcher::fake::FakeClient};
    use crate::options::{CacheOptions, ConnectionOptions};

    struct FakeFactory {
        client: RefCell<Option<FakeClient>>,
    }

    impl FakeFactory {
        fn new(client: Option<FakeClient>) -> Self {
            Self {
                client: RefCell::new(client),
            }
        }
    }

    impl ClientFactory for FakeFactory {
        type Client = FakeClient;

        async fn connect(&self, _: &ConnectionOptions) -> Result<FakeClient, ClientError> {
            self.client
                .borrow_mut()
                .take()
                .ok_or_else(|| ClientError::Setup("no kubeconfig".into()))
        }
    }

    fn cluster() -> FakeClient {
        FakeClient::new("https://api.example.com:6443")
            .with("v1", "Namespace", vec![json!({"metadata": {"name": "default"}})])
            .with(
                "kubevirt.io/v1",
                "VirtualMachine",
                vec![json!({"metadata": {"name": "testvm", "namespace": "default", "uid": "1234"}})],
            )
            .with("kubevirt.io/v1", "VirtualMachineInstance", vec![])
            .with("v1", "Service", vec![])
    }

    fn options(cache_dir: &std::path::Path) -> PluginOptions {
        PluginOptions {
            cache: CacheOptions {
                enabled: true,
                connection: cache_dir.to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cache_miss_fetches_and_stores() {
        // Given
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path());
        let cache = InventoryCache::new(&options.cache, "key");

        // When
        let data = load_data(&FakeFactory::new(Some(cluster())), &options, Some(&cache), false)
            .await
            .unwrap();

        // Then
        assert_eq!(data.default_hostname, "api-example-com_6443");
        assert!(cache.path().exists());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_the_cluster() {
        // Given
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path());
        let cache = InventoryCache::new(&options.cache, "key");
        load_data(&FakeFactory::new(Some(cluster())), &options, Some(&cache), false)
            .await
            .unwrap();

        // When
        let cached = load_data(&FakeFactory::new(None), &options, Some(&cache), false).await;
        let refreshed = load_data(&FakeFactory::new(None), &options, Some(&cache), true).await;

        // Then
        assert!(cached.unwrap().namespaces.contains_key("default"));
        assert!(matches!(refreshed, Err(InventoryError::ClientSetup(_))));
    }

    #[tokio::test]
    async fn test_end_to_end_inventory() {
        // Given
        let options = PluginOptions::default();
        let composer = Composer::new(options.compose.clone()).unwrap();

        // When
        let data = load_data(&FakeFactory::new(Some(cluster())), &options, None, false)
            .await
            .unwrap();
        let mut inventory = InventoryBuilder::new();
        populate_inventory(&mut inventory, &data, &options.inventory, &composer).unwrap();
        let rendered: serde_json::Value =
            serde_json::from_str(&render_inventory(&inventory).unwrap()).unwrap();

        // Then
        assert_eq!(rendered["all"]["children"], json!(["api_example_com_6443"]));
        assert_eq!(
            rendered["api_example_com_6443"]["children"],
            json!(["namespace_default"])
        );
        assert_eq!(rendered["namespace_default"]["hosts"], json!(["default-testvm"]));
        assert_eq!(
            rendered["_meta"]["hostvars"]["default-testvm"]["vm_uid"],
            json!("1234")
        );
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "kubevirt-inventory",
            "--config",
            "test.kubevirt.yml",
            "--host",
            "default-testvm",
        ])
        .unwrap();

        assert_eq!(args.host.as_deref(), Some("default-testvm"));
        assert!(Args::try_parse_from(["kubevirt-inventory", "--list", "--host", "x", "-c", "a"]).is_err());
        assert!(Args::try_parse_from(["kubevirt-inventory", "--schema"]).is_ok());
    }
}
