use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    semindex_server::main_entry().await
}
