use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    lantern_server::main_entry().await
}
