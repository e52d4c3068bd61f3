use assetgate::cli::{
    Args, build_config, handle_create_superadmin, init_logging, load_secret, open_database,
    validate_public_url,
};
use assetgate::{init_cleanup, run_server};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_secret("JWT_SECRET", args.jwt_secret_file.as_deref(), "--jwt-secret-file") else {
        std::process::exit(1);
    };

    let Some(signature_secret) = load_secret(
        "SIGNATURE_SECRET",
        args.signature_secret_file.as_deref(),
        "--signature-secret-file",
    ) else {
        std::process::exit(1);
    };

    let Some(public_url) = validate_public_url(&args.public_url) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(email) = args.create_superadmin.as_deref() {
        handle_create_superadmin(&db, &signature_secret, &public_url, email).await;
    }

    let Some(config) = build_config(&args, db, public_url, jwt_secret, signature_secret) else {
        std::process::exit(1);
    };

    init_cleanup(&config.db).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(_) => info!(address = %addr, "Listening"),
    }

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
