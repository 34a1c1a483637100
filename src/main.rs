use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    token_check_gateway::app::run().await
}
