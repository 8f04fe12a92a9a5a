use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    eagle_bridge::run().await
}
