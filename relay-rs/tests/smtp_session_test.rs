mod common;

use common::{start_server, LineClient};
use relay_rs::queue::{FileQueueStore, MemoryQueueStore, QueueStore};
use relay_rs::security::TlsConfig;
use rustls::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;

async fn upgrade(client: LineClient<TcpStream>) -> LineClient<tokio_rustls::client::TlsStream<TcpStream>> {
    // Any identity works; the connector accepts whatever the server presents
    let connector = TlsConfig::self_signed("client.test").unwrap().connector();
    let tls = connector
        .connect(ServerName::try_from("mx.test").unwrap(), client.into_inner())
        .await
        .unwrap();
    LineClient::new(tls)
}

#[tokio::test]
async fn test_starttls_conversation_queues_message() {
    let store = Arc::new(MemoryQueueStore::new());
    let addr = start_server(store.clone()).await;

    let mut client = LineClient::new(TcpStream::connect(addr).await.unwrap());
    let greeting = client.reply().await;
    assert!(greeting[0].starts_with("220 "));

    client.send("EHLO x").await;
    let capabilities = client.reply().await;
    assert!(capabilities.len() > 1);
    assert!(capabilities.iter().any(|line| line == "250-STARTTLS"));
    assert!(capabilities.last().unwrap().starts_with("250 "));

    assert!(client.command("STARTTLS").await.starts_with("220"));
    let mut client = upgrade(client).await;

    client.send("EHLO x").await;
    let capabilities = client.reply().await;
    assert_eq!(capabilities, vec!["250 mx.test"]);

    assert!(client.command("MAIL FROM:<a@b>").await.starts_with("250"));
    assert!(client.command("RCPT TO:<c@d>").await.starts_with("250"));
    assert!(client.command("DATA").await.starts_with("354"));

    client.send("Subject: hi").await;
    client.send("").await;
    client.send("body").await;
    assert!(client.command(".").await.starts_with("250"));

    assert!(client.command("QUIT").await.starts_with("221"));

    let queued = store.list_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].from, "a@b");
    assert_eq!(queued[0].to, vec!["c@d"]);
    assert_eq!(queued[0].content, b"Subject: hi\r\n\r\nbody\r\n");
    assert_eq!(queued[0].attempts, 0);
}

#[tokio::test]
async fn test_upgrade_discards_plaintext_envelope() {
    let store = Arc::new(MemoryQueueStore::new());
    let addr = start_server(store.clone()).await;

    let mut client = LineClient::new(TcpStream::connect(addr).await.unwrap());
    client.reply().await;

    assert!(client.command("MAIL FROM:<a@b>").await.starts_with("250"));
    assert!(client.command("STARTTLS").await.starts_with("220"));
    let mut client = upgrade(client).await;

    // Sender from the plaintext phase is gone
    assert!(client.command("RCPT TO:<c@d>").await.starts_with("503"));

    // A second upgrade is refused without a handshake
    assert!(client.command("STARTTLS").await.starts_with("503"));
    assert!(client.command("QUIT").await.starts_with("221"));
}

#[tokio::test]
async fn test_out_of_order_commands_keep_connection_usable() {
    let store = Arc::new(MemoryQueueStore::new());
    let addr = start_server(store.clone()).await;

    let mut client = LineClient::new(TcpStream::connect(addr).await.unwrap());
    client.reply().await;

    assert!(client.command("DATA").await.starts_with("503"));
    assert!(client.command("RCPT TO:<c@d>").await.starts_with("503"));
    assert!(client.command("MAIL nobody").await.starts_with("501"));
    assert!(client.command("VRFY root").await.starts_with("500"));

    assert!(client.command("mail from:<a@b>").await.starts_with("250"));
    assert!(client.command("rcpt to:<c@d>").await.starts_with("250"));
    assert!(client.command("data").await.starts_with("354"));
    client.send("..dotted").await;
    assert!(client.command(".").await.starts_with("250"));

    let queued = store.list_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].content, b".dotted\r\n");
}

#[tokio::test]
async fn test_8bit_body_is_spooled_unchanged() {
    let spool = TempDir::new().unwrap();
    let store = Arc::new(FileQueueStore::open(spool.path()).await.unwrap());
    let addr = start_server(store.clone()).await;

    let mut client = LineClient::new(TcpStream::connect(addr).await.unwrap());
    client.reply().await;
    client.command("MAIL FROM:<a@b>").await;
    client.command("RCPT TO:<c@d>").await;
    assert!(client.command("DATA").await.starts_with("354"));

    client.send_bytes(b"Subject: caf\xe9\r\n.\r\n").await;
    assert!(client.reply().await[0].starts_with("250"));

    let reopened = FileQueueStore::open(spool.path()).await.unwrap();
    let queued = reopened.list_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].content, b"Subject: caf\xe9\r\n");
}

#[tokio::test]
async fn test_disconnect_during_data_queues_nothing() {
    let store = Arc::new(MemoryQueueStore::new());
    let addr = start_server(store.clone()).await;

    let mut client = LineClient::new(TcpStream::connect(addr).await.unwrap());
    client.reply().await;
    client.command("MAIL FROM:<a@b>").await;
    client.command("RCPT TO:<c@d>").await;
    assert!(client.command("DATA").await.starts_with("354"));
    client.send("Subject: cut off").await;
    drop(client);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.is_empty().await);
}
