use ledgerbank::mail::LogMailer;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    ledgerbank::run()
        .mailer_factory(|| async { Ok(LogMailer::new("no-reply@ledgerbank.dev")) })
        .start()
        .await
}
