use shardmesh::{
    ErrorKind, HighAvailabilityRuleConfiguration, LogicalSource, LogicalSourceMap, MemoryDataSource,
    ShardingDataSource, ShardingProperties, ShardingRuleConfiguration,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

/// Sources and rule tagged with the same generation label.
fn tagged_generation(tag: usize) -> (LogicalSourceMap, ShardingRuleConfiguration) {
    let name = format!("ds_{}", tag);
    let mut sources = LogicalSourceMap::new();
    sources.insert(name.clone(), LogicalSource::Plain(Arc::new(MemoryDataSource::new(name))));
    (sources, ShardingRuleConfiguration::new(format!("rule_{}", tag)))
}

fn tag_of(prefix: &str, name: &str) -> usize {
    name.strip_prefix(prefix)
        .and_then(|tag| tag.parse().ok())
        .unwrap_or_else(|| panic!("unexpected name {name}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_mixed_generation() {
    const READERS: usize = 4;

    let (sources, rule) = tagged_generation(0);
    let data_source = Arc::new(
        ShardingDataSource::new(sources, rule, ShardingProperties::new().executor_size(4)).unwrap(),
    );
    let started = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));
    let generations = Arc::new(Mutex::new(BTreeSet::new()));

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let data_source = data_source.clone();
        let started = started.clone();
        let done = done.clone();
        let observed = observed.clone();
        let generations = generations.clone();
        readers.push(tokio::spawn(async move {
            started.wait().await;
            while !done.load(Ordering::SeqCst) {
                let mut conn = data_source.get_connection().unwrap();
                let context = conn.context().unwrap();
                let generation = context.generation();
                let rule_tag = tag_of("rule_", &context.rule().name);
                let names = context.registry().names();
                assert_eq!(names.len(), 1);
                assert_eq!(rule_tag, tag_of("ds_", &names[0]));

                let target = names[0].clone();
                let results = conn.execute("SELECT 1", &[target.as_str()]).await.unwrap();
                assert_eq!(results[0].data_source, target);
                observed.fetch_add(1, Ordering::SeqCst);
                generations.lock().unwrap().insert(generation);
                drop(conn);
                tokio::task::yield_now().await;
            }
        }));
    }

    started.wait().await;
    while observed.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    for tag in 1..=20 {
        let (sources, rule) = tagged_generation(tag);
        data_source
            .renew(sources, rule, ShardingProperties::new().executor_size(4))
            .await
            .unwrap();
        let seen = observed.load(Ordering::SeqCst);
        while observed.load(Ordering::SeqCst) == seen {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.await.unwrap();
    }

    assert!(generations.lock().unwrap().len() > 1);
    let context = data_source.context();
    assert_eq!(context.generation(), 21);
    assert_eq!(context.rule().name, "rule_20");
    data_source.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_keeps_its_generation_across_renew() {
    let (sources, rule) = tagged_generation(0);
    let data_source = Arc::new(
        ShardingDataSource::new(
            sources,
            rule,
            ShardingProperties::new()
                .executor_size(2)
                .drain_timeout(Duration::from_secs(5)),
        )
        .unwrap(),
    );
    let mut pinned = data_source.get_connection().unwrap();

    let renewing = {
        let data_source = data_source.clone();
        tokio::spawn(async move {
            let (sources, rule) = tagged_generation(1);
            data_source
                .renew(sources, rule, ShardingProperties::new().executor_size(2))
                .await
        })
    };

    while data_source.context().generation() == 1 {
        tokio::task::yield_now().await;
    }
    assert_eq!(pinned.context().unwrap().rule().name, "rule_0");
    let results = pinned.execute("SELECT 1", &["ds_0"]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!renewing.is_finished());

    drop(pinned);
    renewing.await.unwrap().unwrap();

    let mut fresh = data_source.get_connection().unwrap();
    assert_eq!(fresh.context().unwrap().rule().name, "rule_1");
    assert!(fresh.execute("SELECT 1", &["ds_1"]).await.is_ok());
}

#[tokio::test]
async fn test_invalid_renew_leaves_service_running() {
    let (sources, rule) = tagged_generation(0);
    let data_source = ShardingDataSource::new(sources, rule, ShardingProperties::new().executor_size(1)).unwrap();

    let (sources, mut rule) = tagged_generation(1);
    rule.high_availability_rules
        .push(HighAvailabilityRuleConfiguration::new("ha", vec!["ds_unknown".into()]));
    let err = data_source
        .renew(sources, rule, ShardingProperties::new().executor_size(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineConstruction);

    let mut conn = data_source.get_connection().unwrap();
    assert_eq!(conn.context().unwrap().rule().name, "rule_0");
    assert!(conn.execute("SELECT 1", &["ds_0"]).await.is_ok());
}
