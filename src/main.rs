#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cardapio_metrics::run().await
}
