use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    chat_relay::init_tracing();

    // Missing secrets or a bad config file stop the process before it binds.
    let config = match chat_relay::AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = chat_relay::api::start_server(config).await {
        tracing::error!("Server error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
