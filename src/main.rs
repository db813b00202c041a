use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rcm_analyzer::api;
use rcm_analyzer::config::{AppConfig, ConfigError};
use rcm_analyzer::export::{ExportError, ExportKind};
use rcm_analyzer::pipeline::{Pipeline, PipelineError};
use rcm_analyzer::rcm::{AnalysisDepth, AnalysisOptions, Assessment, RiskLevel};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the web dashboard (default)
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Open the dashboard in the default browser
        #[arg(long)]
        open: bool,
    },
    /// Analyze a file and write the reports to disk
    Analyze {
        file: PathBuf,

        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(long, default_value = "standard")]
        depth: AnalysisDepth,

        #[arg(long)]
        no_recommendations: bool,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Server error: {0}")]
    Server(String),
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        open: false,
    });

    let outcome = match command {
        Command::Serve { host, port, open } => run_server(host, port, open).await,
        Command::Analyze {
            file,
            out_dir,
            depth,
            no_recommendations,
        } => {
            let options = AnalysisOptions {
                depth,
                include_recommendations: !no_recommendations,
            };
            run_analysis(&file, &out_dir, options).await
        }
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn build_pipeline(config: &AppConfig) -> Result<Pipeline, AppError> {
    Pipeline::from_config(config)
        .await
        .map_err(|e| AppError::Provider(e.to_string()))
}

async fn run_server(host: Option<String>, port: Option<u16>, open: bool) -> Result<(), AppError> {
    let mut config = AppConfig::from_env()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| AppError::Server(format!("Invalid address: {}", e)))?;

    let pipeline = build_pipeline(&config).await?;
    info!("Vector store: {:?}", pipeline.store_mode());
    let app = api::create_api(pipeline, config.server.max_upload_bytes)?;

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    let url = format!("http://{}", addr);
    println!("{} {}", "RCM Analyzer running at".bright_green(), url.bright_cyan());
    if open {
        if let Err(e) = webbrowser::open(&url) {
            warn!("Could not open browser: {}", e);
        }
    }

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}

async fn run_analysis(file: &Path, out_dir: &Path, options: AnalysisOptions) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let pipeline = build_pipeline(&config).await?;

    let bytes = tokio::fs::read(file).await?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Analyzing {} ({})", file_name, options.depth.label()));

    let assessment = pipeline.run(&file_name, bytes, &options).await;
    pb.finish_and_clear();
    let assessment = assessment?;

    tokio::fs::create_dir_all(out_dir).await?;
    let now = Local::now();
    for kind in ExportKind::ALL {
        let path = out_dir.join(kind.file_name(now));
        tokio::fs::write(&path, kind.render(&assessment)?).await?;
        println!("{} {}", "Wrote".bright_green(), path.display());
    }

    print_summary(&assessment);
    Ok(())
}

fn print_summary(assessment: &Assessment) {
    println!("\n{}", "Risk Control Matrix Analysis".bold());
    println!("File: {}", assessment.file_name.bright_yellow());
    println!("Depth: {}", assessment.depth.label());
    println!("Controls analyzed: {}", assessment.controls.len());
    println!("Gaps identified: {}", assessment.gap_count());
    println!("Overall risk score: {}", assessment.risk_score_label());

    println!(
        "Distribution: {} / {} / {}",
        format!("High {}", assessment.distribution.get(RiskLevel::High)).red(),
        format!("Medium {}", assessment.distribution.get(RiskLevel::Medium)).yellow(),
        format!("Low {}", assessment.distribution.get(RiskLevel::Low)).green(),
    );

    for risk in &assessment.department_risks {
        let level = match risk.overall_risk_level {
            RiskLevel::High => risk.overall_risk_level.as_str().red(),
            RiskLevel::Medium => risk.overall_risk_level.as_str().yellow(),
            RiskLevel::Low => risk.overall_risk_level.as_str().green(),
        };
        println!("  • {} ({})", risk.department, level);
    }
}
