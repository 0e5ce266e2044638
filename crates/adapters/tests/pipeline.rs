//! Feed source, SQLite store and dispatcher driven together over wiremock

use post_relay_adapters::dry_run::LogSink;
use post_relay_adapters::sources::{FeedSource, FeedSourceConfig};
use post_relay_adapters::state::SqliteStateStore;
use post_relay_domain::usecases::{
    ConfiguredSource, Dispatcher, DispatcherConfig, RenderConfig, Renderer,
};
use post_relay_domain::{FilterConfig, SourceAdapter, StateStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WITH_GUIDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Wire</title>
    <link>https://wire.example.com</link>
    <description>Headlines</description>
    <item>
      <title>Third</title>
      <link>https://wire.example.com/3</link>
      <guid>wire-3</guid>
      <pubDate>Mon, 15 Jan 2024 14:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://wire.example.com/2</link>
      <guid>wire-2</guid>
      <pubDate>Mon, 15 Jan 2024 13:00:00 GMT</pubDate>
    </item>
    <item>
      <title>First</title>
      <link>https://wire.example.com/1</link>
      <guid>wire-1</guid>
      <pubDate>Mon, 15 Jan 2024 12:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

fn without_guids(headline: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Bare Wire</title>
    <link>https://wire.example.com</link>
    <description>Headlines</description>
    <item>
      <title>{}</title>
      <link>https://wire.example.com/b</link>
      <pubDate>Mon, 15 Jan 2024 14:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Another headline</title>
      <link>https://wire.example.com/a</link>
      <pubDate>Mon, 15 Jan 2024 13:00:00 GMT</pubDate>
    </item>
    <item>
      <pubDate>Mon, 15 Jan 2024 12:00:00 GMT</pubDate>
      <description>Only a description</description>
    </item>
  </channel>
</rss>"#,
        headline
    )
}

struct Pipeline {
    _dir: TempDir,
    store: Arc<SqliteStateStore>,
    sink: Arc<LogSink>,
    dispatcher: Dispatcher<SqliteStateStore, LogSink, SystemClock>,
    source_id: String,
}

async fn pipeline(server: &MockServer) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteStateStore::new(dir.path().join("state.sqlite"))
            .await
            .unwrap(),
    );
    let sink = Arc::new(LogSink::new(Renderer::new(RenderConfig::default())));

    let source = FeedSource::new(
        reqwest::Client::new(),
        FeedSourceConfig {
            url: format!("{}/rss.xml", server.uri()),
            name: None,
            max_items: 20,
            // Wide enough that the fixed 2024 dates count as recent
            initial_max_age: Duration::from_secs(100 * 365 * 24 * 60 * 60),
            timeout: Duration::from_secs(5),
        },
    );
    let source_id = source.source_id().to_string();

    let dispatcher = Dispatcher::new(
        vec![ConfiguredSource::new(Arc::new(source), FilterConfig::default())],
        store.clone(),
        sink.clone(),
        Arc::new(SystemClock),
        DispatcherConfig::default(),
    );

    Pipeline {
        _dir: dir,
        store,
        sink,
        dispatcher,
        source_id,
    }
}

#[tokio::test]
async fn test_second_cycle_sends_nothing_new() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WITH_GUIDS))
        .mount(&server)
        .await;

    let p = pipeline(&server).await;

    let first = p.dispatcher.run_cycle().await;
    assert_eq!(first.delivered(), 3);
    assert_eq!(p.sink.count(), 3);
    assert_eq!(p.store.seen_count().await.unwrap(), 3);
    assert!(p.store.get_cursor(&p.source_id).await.unwrap().is_some());

    let second = p.dispatcher.run_cycle().await;
    assert_eq!(second.delivered(), 0);
    assert_eq!(p.sink.count(), 3);
    assert_eq!(p.store.seen_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_entries_without_guids_are_not_resent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(without_guids("Breaking headline")),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // The publisher rewords a headline between polls
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(without_guids("Reworded headline")),
        )
        .mount(&server)
        .await;

    let p = pipeline(&server).await;

    let first = p.dispatcher.run_cycle().await;
    assert_eq!(first.delivered(), 3);
    assert_eq!(p.store.seen_count().await.unwrap(), 3);

    let second = p.dispatcher.run_cycle().await;
    assert_eq!(second.delivered(), 0);
    assert_eq!(p.sink.count(), 3);
    assert_eq!(p.store.seen_count().await.unwrap(), 3);
}
