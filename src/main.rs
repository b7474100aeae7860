use clap::Parser;
use log::{error, info, warn};
use pingora::prelude::*;
use pingora::server::configuration::Opt;
use pingora_api_guard::*;
use pingora_proxy::http_proxy_service;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/security.yaml")]
    config: String,

    /// Upstream backend host
    #[arg(short = 'u', long, default_value = "127.0.0.1")]
    upstream_host: String,

    /// Upstream backend port
    #[arg(short = 'p', long, default_value = "8080")]
    upstream_port: u16,

    /// Listening address
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    listen_addr: String,

    /// Listening port
    #[arg(short = 'P', long, default_value = "6188")]
    listen_port: u16,

    /// Metrics port
    #[arg(short = 'm', long, default_value = "6190")]
    metrics_port: u16,

    /// Reload the configuration file when it changes
    #[arg(short = 'w', long)]
    watch: bool,

    /// Seconds between stale tracking cleanups
    #[arg(long, default_value = "300")]
    cleanup_interval_secs: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting API security proxy...");
    info!("Loading configuration from: {}", args.config);

    let config = SecurityConfig::from_file(&args.config).unwrap_or_else(|e| {
        error!("Failed to load configuration from {}: {}", args.config, e);
        error!("Using default configuration");
        SecurityConfig::default()
    });

    let pipeline = Arc::new(SecurityPipeline::new(config));
    if let Err(e) = pipeline.metrics().register_global() {
        warn!("Security metrics not exported: {}", e);
    }

    // Dropping the watcher stops notifications, so it lives until exit.
    let mut config_watcher = ConfigWatcher::new(&args.config);
    if args.watch {
        let reload_target = Arc::clone(&pipeline);
        if let Err(e) = config_watcher.start_watching(Box::new(move |new_config| {
            reload_target.reload(new_config);
        })) {
            error!("Hot reload disabled: {}", e);
        }
    }

    let cleanup_target = Arc::clone(&pipeline);
    let cleanup_interval = Duration::from_secs(args.cleanup_interval_secs.max(1));
    std::thread::spawn(move || loop {
        std::thread::sleep(cleanup_interval);
        cleanup_target.prune_stale();
    });

    info!("Upstream backend: {}:{}", args.upstream_host, args.upstream_port);
    let proxy = SecurityProxy::new(
        (args.upstream_host.clone(), args.upstream_port),
        Arc::clone(&pipeline),
    );

    let mut server = match Server::new(Some(Opt::default())) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };
    server.bootstrap();

    let mut proxy_service = http_proxy_service(&server.configuration, proxy);
    let listen_address = format!("{}:{}", args.listen_addr, args.listen_port);
    proxy_service.add_tcp(&listen_address);
    server.add_service(proxy_service);

    let metrics_address = format!("{}:{}", args.listen_addr, args.metrics_port);
    let mut prometheus_service_http =
        pingora::services::listening::Service::prometheus_http_service();
    prometheus_service_http.add_tcp(&metrics_address);
    server.add_service(prometheus_service_http);

    info!("Security proxy:  http://{}", listen_address);
    info!("Metrics:         http://{}/metrics", metrics_address);
    info!("Upstream:        {}:{}", args.upstream_host, args.upstream_port);
    info!("Config:          {} (watch: {})", args.config, config_watcher.is_enabled());

    server.run_forever();
}
