use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinSet;

pub mod api;
pub mod config;
pub mod http_behavior;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod user;
pub mod utils;
pub mod ws_behavior;

use api::ApiClient;
use config::Config;
use metrics::{run_event_collector, ChannelSink, Statistics};
use registry::UserRegistry;
use user::{run_virtual_user, LoadTestState};

pub fn run(config: Config) -> ::anyhow::Result<()> {
    println!("Starting client with config: {:#?}", config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.num_workers)
        .thread_name("load-test")
        .enable_all()
        .build()
        .context("Couldn't build async runtime")?;

    let statistics = Arc::new(Statistics::default());
    let (sink, receiver) = ChannelSink::new();

    let collector = {
        let statistics = statistics.clone();
        let events_file = config.statistics.events_file.clone();

        thread::Builder::new()
            .name("event-collector".into())
            .spawn(move || run_event_collector(receiver, &statistics, events_file.as_deref()))
            .context("Couldn't spawn event collector thread")?
    };

    let result = runtime.block_on(run_load_test(config, Arc::new(sink), statistics));

    // Drops the event senders held by tasks that are still around
    runtime.shutdown_timeout(Duration::from_secs(1));

    let collector_result = collector
        .join()
        .map_err(|_| anyhow::anyhow!("event collector thread panicked"))?;

    result.and(collector_result)
}

async fn run_load_test(
    config: Config,
    sink: Arc<ChannelSink>,
    statistics: Arc<Statistics>,
) -> anyhow::Result<()> {
    let api = ApiClient::new(
        &config.http_server_url,
        Duration::from_millis(config.http.request_timeout_ms),
    )?;

    let state = LoadTestState {
        config: Arc::new(config.clone()),
        api,
        registry: Arc::new(UserRegistry::default()),
        sink,
    };

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let mut users = JoinSet::new();
    let mut num_spawned = 0;
    let mut failure = None;

    let start_time = Instant::now();

    let mut spawn_interval = tokio::time::interval(Duration::from_millis(
        config.user_spawn_interval_ms.max(1),
    ));
    let report_period = Duration::from_secs(config.statistics.interval);
    let mut report_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + report_period, report_period);

    let run_duration = async {
        if config.duration == 0 {
            futures::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(config.duration)).await
        }
    };
    let ctrl_c = tokio::signal::ctrl_c();
    let mut listening_for_ctrl_c = true;

    tokio::pin!(run_duration);
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = spawn_interval.tick(), if num_spawned < config.num_users => {
                users.spawn(run_virtual_user(state.clone(), shutdown_receiver.clone()));

                num_spawned += 1;
            }
            Some(joined) = users.join_next() => {
                if let Err(err) = flatten_join_result(joined) {
                    ::log::error!("virtual user failed: {:#}", err);

                    failure = Some(err);

                    break;
                }
            }
            _ = report_interval.tick() => {
                print_statistics(&statistics, &state.registry, report_period);
            }
            _ = &mut run_duration => break,
            result = &mut ctrl_c, if listening_for_ctrl_c => {
                listening_for_ctrl_c = false;

                if is_interrupt(result) {
                    println!("Interrupted, stopping virtual users");

                    break;
                }
            }
        }

        if num_spawned == config.num_users && users.is_empty() {
            println!("All virtual users stopped");

            break;
        }
    }

    // Tasks in progress run to completion, no new ones start
    let _ = shutdown_sender.send(true);

    while let Some(joined) = users.join_next().await {
        if let Err(err) = flatten_join_result(joined) {
            ::log::error!("virtual user failed: {:#}", err);

            failure.get_or_insert(err);
        }
    }

    report(&statistics, &state.registry, start_time.elapsed());

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// A signal listener that failed to start is logged, not taken as Ctrl-C
fn is_interrupt(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            ::log::error!("Couldn't listen for Ctrl-C: {:#}", err);

            false
        }
    }
}

fn flatten_join_result(
    joined: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    joined.context("virtual user task panicked")?
}

fn print_statistics(statistics: &Statistics, registry: &UserRegistry, period: Duration) {
    let period = period.as_secs_f64();

    let per_second = |counter: &std::sync::atomic::AtomicUsize| {
        counter.swap(0, Ordering::Relaxed) as f64 / period
    };

    let successes = per_second(&statistics.successes);
    let failures = per_second(&statistics.failures);
    let sent = per_second(&statistics.sent);
    let received = per_second(&statistics.received);

    println!();
    println!("HTTP responses: {:.2}/second", successes + failures);
    println!("  - Success:  {:.2}", successes);
    println!("  - Failure:  {:.2}", failures);
    println!("WebSocket sent:     {:.2}/second", sent);
    println!("WebSocket received: {:.2}/second", received);
    println!("Registered users: {}", registry.len());
}

fn report(statistics: &Statistics, registry: &UserRegistry, time_elapsed: Duration) {
    println!(
        concat!(
            "\n# nearby_friends load test report\n\n",
            "Test ran for {} seconds.\n",
            "Registered users: {}\n",
            "Successful friend requests: {}\n",
            "Events since last printout: {} success, {} failure, {} sent, {} received\n",
        ),
        time_elapsed.as_secs(),
        registry.len(),
        registry.total_friend_count(),
        statistics.successes.load(Ordering::Relaxed),
        statistics.failures.load(Ordering::Relaxed),
        statistics.sent.load(Ordering::Relaxed),
        statistics.received.load(Ordering::Relaxed),
    );
}
