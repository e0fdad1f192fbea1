use crate::ports;
use anyhow::{Context, Result};
use colored::Colorize;
use routekit::routekit_router::Route;
use routekit::{App, Config};
use std::path::Path;

/// Runs the server until a fatal shutdown, then exits with status 1
pub fn execute(path: &Path, production: bool, port: Option<u16>) -> Result<()> {
    let mut config = Config::load_for_project(path)
        .with_context(|| format!("Failed to load configuration for {}", path.display()))?;
    if production {
        config.production = true;
        config.dev.hot_reload = false;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    if ports::is_privileged(config.server.port) {
        ports::ensure_privileged_ports_disabled();
    }

    print_banner(&config);

    let shutdown = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let app = App::start(path, config).context("Failed to start")?;
            print_routes(&app);
            app.serve().await
        })?;

    eprintln!("{} {}", "✗ Stopping:".red().bold(), shutdown);
    std::process::exit(1);
}

fn print_banner(config: &Config) {
    let mode = if config.production {
        "production".yellow()
    } else {
        "development".green()
    };

    println!("{}", "routekit".green().bold());
    println!("  Mode: {}", mode);
    println!(
        "  Hot reload: {}",
        if config.hot_reload_enabled() { "enabled".green() } else { "disabled".dimmed() }
    );
    println!("  Address: http://{}:{}", config.server.host, config.server.port);
    println!();
}

fn print_routes(app: &App) {
    let routes = app.registry().routes();
    let base = app.base_path();

    println!("{} ({})", "Routes".bold(), routes.len());
    for route in &routes {
        println!("  {}", route_line(route, &base));
    }
    println!();
}

fn route_line(route: &Route, base: &Path) -> String {
    let file = route
        .file_path
        .strip_prefix(base)
        .unwrap_or(&route.file_path)
        .display()
        .to_string();
    let kind = format!("{:<8}", route.kind.label());
    let pattern = format!("{:<32}", route.pattern);
    format!("{} {} {}", kind.cyan(), pattern.green(), file.dimmed())
}
