use std::process::ExitCode;

use terraform_provider_aikido::{
    init_logging, launched_by_host, serve, AikidoProvider, MAGIC_COOKIE_KEY,
};

#[tokio::main]
async fn main() -> ExitCode {
    if !launched_by_host(std::env::var(MAGIC_COOKIE_KEY).ok().as_deref()) {
        eprintln!(
            "This binary is an aikido.provider.v1 plugin and is not meant to be executed\n\
             directly. It is spawned by a host that speaks that protocol."
        );
        return ExitCode::FAILURE;
    }

    init_logging();

    match serve(AikidoProvider::new(env!("CARGO_PKG_VERSION"))).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Provider server exited with an error");
            ExitCode::FAILURE
        },
    }
}
