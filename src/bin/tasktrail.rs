//! tasktrail CLI: operator interface to the task audit trail.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tasktrail::broker::{PgmqBroker, Task, TaskContext};
use tasktrail::config::Config;
use tasktrail::model::{RecordFilter, Status};
use tasktrail::store::StoreConfig;
use tasktrail::telemetry::{TelemetryConfig, init_telemetry};
use tasktrail::{
    Client, EnqueueOptions, HandlerResult, Processor, ServeMux, SqlStore, TaskStore,
};

#[derive(Parser)]
#[command(name = "tasktrail", about = "Audit trail for queued background tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker that processes tasks from the configured queues
    Serve,
    /// Create or upgrade the audit table
    Migrate,
    /// Submit a task through the pgmq broker and record it
    Submit {
        /// Task type (determines handler routing)
        task_type: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Queue name (defaults to TASKTRAIL_QUEUE)
        #[arg(long)]
        queue: Option<String>,
        /// Redeliveries allowed after a failure
        #[arg(long)]
        max_retry: Option<u32>,
    },
    /// Show one task record
    Show {
        /// Task ID
        id: String,
    },
    /// List recent task records
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by task type
        #[arg(long = "type")]
        task_type: Option<String>,
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "tasktrail".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store = SqlStore::connect(&StoreConfig::new(config.database_url.expose_secret())).await?;

    match cli.command {
        Command::Serve => cmd_serve(&config, store).await,
        Command::Migrate => {
            store.migrate().await?;
            println!("Migrations applied ({:?} placeholders).", store.dialect());
            Ok(())
        }
        Command::Submit {
            task_type,
            payload,
            queue,
            max_retry,
        } => cmd_submit(&config, store, task_type, payload, queue, max_retry).await,
        Command::Show { id } => cmd_show(&store, &id).await,
        Command::List {
            status,
            task_type,
            limit,
        } => cmd_list(&store, status, task_type, limit).await,
    }
}

async fn cmd_serve(config: &Config, store: SqlStore) -> anyhow::Result<()> {
    store.migrate().await?;

    let processor_config = config.processor_config();
    let broker = PgmqBroker::connect(config.queue_url()).await?;
    for queue in processor_config.queues.keys() {
        broker.create_queue(queue).await?;
    }

    let mut mux = ServeMux::new();
    mux.handle_func("echo:", echo);

    let processor = Processor::new(Arc::new(broker), Some(Arc::new(store)), processor_config);

    let ctrl = processor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    processor.start(mux).await?;
    Ok(())
}

/// Built-in handler: log the payload and succeed.
async fn echo(ctx: TaskContext, task: Task) -> HandlerResult {
    tracing::info!(
        task_id = ctx.task_id().unwrap_or_default(),
        task_type = task.task_type(),
        payload = %String::from_utf8_lossy(task.payload()),
        "echo"
    );
    Ok(())
}

async fn cmd_submit(
    config: &Config,
    store: SqlStore,
    task_type: String,
    payload: Option<String>,
    queue: Option<String>,
    max_retry: Option<u32>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };

    let broker = PgmqBroker::connect(config.queue_url()).await?;
    let queue = queue.unwrap_or_else(|| config.default_queue.clone());
    broker.create_queue(&queue).await?;

    let client = Client::new(
        Arc::new(broker),
        Some(Arc::new(store)),
        config.client_options(),
    );

    let mut options = EnqueueOptions::default().queue(queue);
    if let Some(n) = max_retry {
        options = options.max_retry(n);
    }

    let info = client.enqueue(&task_type, &payload, options).await?;
    println!("Enqueued: {} (queue: {}, max retry: {})", info.id, info.queue, info.max_retry);
    client.close().await?;
    Ok(())
}

async fn cmd_show(store: &SqlStore, id: &str) -> anyhow::Result<()> {
    let record = store.get_by_id(id).await?;

    println!("ID:         {}", record.id);
    println!("Type:       {}", record.task_type);
    println!("Queue:      {}", record.queue);
    println!("Status:     {}", record.status);
    println!("Created:    {}", record.created_at);
    println!("Enqueued:   {}", record.enqueued_at);
    if let Some(started) = record.started_at {
        println!("Started:    {started}");
    }
    if let Some(finished) = record.finished_at {
        println!("Finished:   {finished}");
        if let Some(started) = record.started_at {
            println!("Duration:   {}ms", (finished - started).num_milliseconds());
        }
    }
    println!("Payload:    {}", pretty_json(&record.payload));
    if let Some(ref result) = record.result_payload {
        println!("Result:     {}", pretty_json(result));
    }
    if let Some(ref err) = record.error_message {
        println!("Error:      {err}");
    }

    Ok(())
}

async fn cmd_list(
    store: &SqlStore,
    status: Option<String>,
    task_type: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status: Option<Status> = match status {
        Some(s) => Some(s.parse()?),
        None => None,
    };

    let records = store
        .list_recent(&RecordFilter { status, task_type }, limit)
        .await?;

    if records.is_empty() {
        println!("No task records found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<10}  {:<11}  CREATED",
        "ID", "TYPE", "QUEUE", "STATUS"
    );
    println!("{}", "-".repeat(100));

    for record in &records {
        println!(
            "{:<36}  {:<20}  {:<10}  {:<11}  {}",
            record.id,
            truncate(&record.task_type, 20),
            truncate(&record.queue, 10),
            record.status,
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} record(s)", records.len());
    Ok(())
}

/// Pretty-print stored JSON, falling back to the raw text.
fn pretty_json(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| raw.to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
