use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stream_mq::{
    config::Settings,
    error::AppError,
    messaging::{
        init_messaging_metrics, ConsumerConfig, Message, MessageConsumer, MessageProcessor,
        MessageProducer, MessagingResult, ProducerConfig, RedisBroker, StreamConsumer,
        StreamProducer,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stream-mq")]
#[command(version, about = "Produce to and consume from Redis streams", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "STREAM_MQ_CONFIG")]
    config: Option<PathBuf>,

    /// Redis connection string, overrides the configuration file
    #[arg(long)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append messages to a stream
    Produce {
        /// Target stream
        #[arg(short, long)]
        stream: Option<String>,

        /// Approximate stream length cap
        #[arg(short, long)]
        max_len: Option<usize>,

        /// Explicit entry ID (single message only)
        #[arg(long)]
        id: Option<String>,

        /// Message payloads, one message each
        #[arg(required = true)]
        data: Vec<String>,
    },

    /// Consume a stream through a consumer group until interrupted
    Consume {
        /// Source stream
        #[arg(short, long)]
        stream: Option<String>,

        /// Consumer group
        #[arg(short, long)]
        group: Option<String>,

        /// Consumer name within the group
        #[arg(short = 'n', long)]
        consumer: Option<String>,
    },
}

/// Logs every message it receives
struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: &Message) -> MessagingResult<()> {
        tracing::info!(message_id = %message.id, data = %message.data_as_str(), "Received message");
        Ok(())
    }

    async fn wait(&self) -> MessagingResult<()> {
        Ok(())
    }
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stream_mq=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    if let Err(e) = run(cli).await {
        tracing::error!(code = e.error_code(), error = %e, "stream-mq failed");
        return Err(e.into());
    }

    Ok(())
}

async fn run(cli: Cli) -> stream_mq::Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(redis_url) = cli.redis_url {
        settings.redis_url = redis_url;
    }

    init_messaging_metrics();

    match cli.command {
        Commands::Produce {
            stream,
            max_len,
            id,
            data,
        } => {
            if id.is_some() && data.len() > 1 {
                return Err(AppError::Validation(
                    "--id can only be used with a single message".to_string(),
                ));
            }

            let config = producer_config(&settings, stream, max_len)?;
            let broker = Arc::new(RedisBroker::connect(&settings.redis_url).await?);
            let producer = StreamProducer::new(broker, config);

            for payload in data {
                let mut message = match &id {
                    Some(id) => Message::with_id(id.clone(), payload),
                    None => Message::new(payload),
                };
                producer.send(&mut message).await?;
                println!("{}", message.id);
            }
        }

        Commands::Consume {
            stream,
            group,
            consumer,
        } => {
            let config = consumer_config(&settings, stream, group, consumer)?;
            let broker = Arc::new(RedisBroker::connect(&settings.redis_url).await?);
            let consumer = Arc::new(
                StreamConsumer::new(broker, config).with_retry(settings.retry.clone()),
            );
            consumer.set_message_processor(Arc::new(LoggingProcessor));

            let stopper = consumer.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }
                tracing::info!("Shutdown signal received");
                if let Err(e) = stopper.stop().await {
                    tracing::error!(error = %e, "Failed to stop consumer");
                }
            });

            consumer.start().await?;
        }
    }

    Ok(())
}

fn producer_config(
    settings: &Settings,
    stream: Option<String>,
    max_len: Option<usize>,
) -> stream_mq::Result<ProducerConfig> {
    let base = settings.producer.as_ref();

    let stream_key = stream
        .or_else(|| base.map(|p| p.stream_key.clone()))
        .ok_or_else(|| missing("no stream given: pass --stream or set [producer].stream_key"))?;
    let max_len = max_len
        .or_else(|| base.map(|p| p.max_len))
        .ok_or_else(|| missing("no length cap given: pass --max-len or set [producer].max_len"))?;

    let config = ProducerConfig::new(stream_key, max_len);
    validator::Validate::validate(&config)?;
    Ok(config)
}

fn consumer_config(
    settings: &Settings,
    stream: Option<String>,
    group: Option<String>,
    consumer: Option<String>,
) -> stream_mq::Result<ConsumerConfig> {
    let base = settings.consumer.as_ref();

    let stream_key = stream
        .or_else(|| base.map(|c| c.stream_key.clone()))
        .ok_or_else(|| missing("no stream given: pass --stream or set [consumer].stream_key"))?;
    let group_name = group
        .or_else(|| base.map(|c| c.group_name.clone()))
        .ok_or_else(|| missing("no group given: pass --group or set [consumer].group_name"))?;
    let consumer_name = consumer
        .or_else(|| base.map(|c| c.consumer_name.clone()))
        .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::new_v4()));

    let config = ConsumerConfig::new(stream_key, group_name, consumer_name);
    validator::Validate::validate(&config)?;
    Ok(config)
}

fn missing(what: &str) -> AppError {
    AppError::Configuration(what.to_string())
}
