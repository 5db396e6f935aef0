use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wifi_portal::{
    config::{self, Config},
    event_channel, nmcli, scan, server,
    sim::SimDriver,
    WifiContext, WifiDriver,
};

#[derive(Parser)]
#[command(name = "wifi-portal")]
#[command(about = "Serve a web portal for picking and joining a WiFi network")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configuration portal
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to use (defaults to the first WiFi device)
        #[arg(short, long)]
        interface: Option<String>,

        /// Use a simulated radio instead of NetworkManager
        #[arg(long)]
        simulate: bool,
    },

    /// Scan for WiFi networks once and print them
    Scan {
        /// Interface to use (defaults to the first WiFi device)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// List available WiFi interfaces
    ListInterfaces,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wifi_portal=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            interface,
            simulate,
        } => cmd_serve(cfg, port, interface, simulate).await,
        Commands::Scan { interface } => cmd_scan(&cfg, interface.as_deref()),
        Commands::ListInterfaces => cmd_list_interfaces(),
        Commands::ShowConfig => cmd_show_config(&cfg, cli.config),
    }
}

async fn cmd_serve(
    mut cfg: Config,
    port: Option<u16>,
    interface: Option<String>,
    simulate: bool,
) -> Result<()> {
    if let Some(port) = port {
        cfg.server.port = port;
    }
    if interface.is_some() {
        cfg.wifi.interface = interface;
    }

    let (tx, rx) = event_channel();
    let driver: Arc<dyn WifiDriver> = if simulate {
        info!("Using simulated radio");
        let sim = SimDriver::new(tx.clone())
            .with_auto(Duration::from_millis(1500), Duration::from_secs(2))
            .with_access_point(&cfg.access_point);
        sim.set_networks(SimDriver::demo_networks());
        Arc::new(sim)
    } else {
        let iface = nmcli::resolve_interface(cfg.wifi.interface.as_deref())?;
        info!("Using interface {}", iface.name);
        Arc::new(nmcli::NmcliDriver::new(&iface.name, &cfg.access_point, tx.clone())?)
    };

    if cfg.wifi.demo_mode {
        info!("Demo mode: radio configuration will not be changed");
    }

    let ctx = WifiContext::new(driver, tx, cfg.wifi.clone());
    tokio::spawn(ctx.clone().run(rx));

    server::run_server(ctx, &cfg.server).await
}

fn cmd_scan(cfg: &Config, interface: Option<&str>) -> Result<()> {
    let iface = nmcli::resolve_interface(interface.or(cfg.wifi.interface.as_deref()))?;
    println!("Scanning on interface: {}", iface.name);
    println!();

    let networks = nmcli::scan_blocking(&iface.name)?;
    scan::display_networks(&networks);

    Ok(())
}

fn cmd_list_interfaces() -> Result<()> {
    let interfaces = nmcli::list_wifi_interfaces()?;

    if interfaces.is_empty() {
        println!("No WiFi interfaces found.");
        return Ok(());
    }

    println!("{:<16} {}", "INTERFACE", "STATE");
    println!("{}", "-".repeat(32));

    for iface in interfaces {
        println!("{:<16} {}", iface.name, iface.state);
    }

    Ok(())
}

fn cmd_show_config(cfg: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => config::config_path()?,
    };
    println!("Config file: {}", path.display());
    println!();

    println!("Listen:          {}:{}", cfg.server.bind, cfg.server.port);
    println!(
        "Interface:       {}",
        cfg.wifi.interface.as_deref().unwrap_or("(auto)")
    );
    println!("Connect delay:   {} ms", cfg.wifi.connect_delay_ms);
    println!("Connect timeout: {} ms", cfg.wifi.connect_timeout_ms);
    println!("Restart delay:   {} ms", cfg.wifi.restart_delay_ms);
    println!("On resubmit:     {:?}", cfg.wifi.on_resubmit);
    println!("Demo mode:       {}", cfg.wifi.demo_mode);
    println!();

    let masked_pw = "*".repeat(cfg.access_point.password.len().min(12));
    println!(
        "Access point:    {} (channel {}, password {})",
        cfg.access_point.ssid,
        cfg.access_point.channel,
        if masked_pw.is_empty() { "-" } else { &masked_pw }
    );

    match &cfg.upload {
        Some(upload) => println!(
            "Upload:          {:?} fw1={:#x} fw2={} size={:#x} tag='{}'",
            upload.kind,
            upload.fw1_pos,
            upload.fw2_pos.map_or("-".to_string(), |pos| format!("{pos:#x}")),
            upload.fw_size,
            upload.tag_name
        ),
        None => println!("Upload:          disabled"),
    }

    Ok(())
}
