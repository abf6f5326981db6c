#[tokio::main]
async fn main() -> anyhow::Result<()> {
    babybeat_lib::run().await
}
