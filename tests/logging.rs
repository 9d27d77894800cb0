mod common;

use common::fixture;
use std::io;
use std::sync::{Arc, Mutex};
use tenanted_sdk::TenantContext;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn statements_are_logged_with_the_tenant() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let fx = fixture("");
    let count = TenantContext::with_tenant("acme", async {
        let pool = fx.tenanted.registry.current_pool(&fx.base).await?;
        pool.execute("INSERT INTO notes (body) VALUES ('tagged')").await?;
        pool.fetch_scalar::<i64>("SELECT COUNT(*) FROM notes").await
    })
    .await
    .unwrap();
    assert_eq!(count, 1);

    let lines = captured.lines();
    let statements: Vec<&String> = lines
        .iter()
        .filter(|line| line.contains("INSERT INTO notes") || line.contains("SELECT COUNT(*)"))
        .collect();
    assert!(statements.len() >= 2, "no statement lines in {:#?}", lines);
    for line in statements {
        // The span prefix, not just the message suffix.
        assert!(line.contains("tenant{tenant=acme"), "statement outside the tenant span: {}", line);
    }
}
