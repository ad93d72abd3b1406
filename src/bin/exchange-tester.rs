//! Exchange Tester CLI Tool
//!
//! Command-line tool for driving a running referral exchange through RabbitMQ.
//!
//! Usage:
//!   cargo run --bin exchange-tester -- --help
//!   cargo run --bin exchange-tester join --id alice --link https://shop.test/r/alice
//!   cargo run --bin exchange-tester done --id alice
//!   cargo run --bin exchange-tester stats --admin root
//!   cargo run --bin exchange-tester monitor --duration 30
//!   cargo run --bin exchange-tester rotation --participants 4

use std::sync::{Arc, Mutex};
use std::time::Duration;

use amqprs::{
    channel::{
        BasicConsumeArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments,
        QueueBindArguments, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use referral_exchange::amqp::connection::{AmqpConfig, AmqpConnection};
use referral_exchange::amqp::messages::{MessageEnvelope, MessageUtils};
use referral_exchange::config::AppConfig;
use referral_exchange::types::{InboundEvent, Notification, NotificationKind};

#[derive(Parser)]
#[command(name = "exchange-tester")]
#[command(about = "Publish participant events to a running referral exchange and watch replies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// AMQP URL for RabbitMQ connection (defaults to AMQP_URL or the service default)
    #[arg(long)]
    amqp_url: Option<String>,

    /// Seconds to wait for notifications after publishing
    #[arg(long, default_value = "2")]
    wait: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the queue with a referral link
    Join {
        #[arg(short, long)]
        id: String,
        #[arg(short, long)]
        link: String,
    },
    /// Confirm the pending referral
    Done {
        #[arg(short, long)]
        id: String,
    },
    /// Leave the queue (or remove someone else with --by an admin id)
    Leave {
        #[arg(short, long)]
        id: String,
        #[arg(long)]
        by: Option<String>,
    },
    /// Show a participant's status
    Info {
        #[arg(short, long)]
        id: String,
    },
    /// Show the queue (admin)
    Queue {
        #[arg(short, long)]
        admin: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show queue statistics (admin)
    Stats {
        #[arg(short, long)]
        admin: String,
    },
    /// Send a message to every participant (admin)
    Broadcast {
        #[arg(short, long)]
        admin: String,
        #[arg(short, long)]
        text: String,
    },
    /// Print notifications for a while
    Monitor {
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Join N participants, then have each complete the referral it receives
    Rotation {
        #[arg(short, long, default_value = "3")]
        participants: usize,
    },
}

struct ExchangeTester {
    publish_channel: Channel,
    _consume_channel: Channel,
    _connection: AmqpConnection,
    event_queue: String,
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl ExchangeTester {
    async fn connect(config: &AppConfig) -> Result<Self> {
        let amqp_config = AmqpConfig::from_app_config(config)?;
        let connection = AmqpConnection::new(amqp_config)
            .await
            .context("Failed to connect to RabbitMQ")?;

        let publish_channel = connection.open_channel().await?;
        let consume_channel = connection.open_channel().await?;

        // Same declarations as the service so either side can start first
        publish_channel
            .queue_declare(
                QueueDeclareArguments::new(&config.amqp.event_queue)
                    .durable(true)
                    .auto_delete(false)
                    .finish(),
            )
            .await
            .context("Failed to declare event queue")?;

        consume_channel
            .exchange_declare(
                ExchangeDeclareArguments::new(&config.amqp.notification_exchange, "topic")
                    .durable(true)
                    .finish(),
            )
            .await
            .context("Failed to declare notification exchange")?;

        let tap_queue = format!("exchange-tester-{}", uuid::Uuid::new_v4());
        consume_channel
            .queue_declare(
                QueueDeclareArguments::new(&tap_queue)
                    .exclusive(true)
                    .auto_delete(true)
                    .finish(),
            )
            .await
            .context("Failed to declare tap queue")?;
        consume_channel
            .queue_bind(QueueBindArguments::new(
                &tap_queue,
                &config.amqp.notification_exchange,
                "notification.#",
            ))
            .await
            .context("Failed to bind tap queue")?;

        let notifications = Arc::new(Mutex::new(Vec::new()));
        consume_channel
            .basic_consume(
                NotificationTap {
                    notifications: notifications.clone(),
                },
                BasicConsumeArguments::new(&tap_queue, "exchange-tester")
                    .manual_ack(false)
                    .finish(),
            )
            .await
            .context("Failed to start consuming notifications")?;

        Ok(Self {
            publish_channel,
            _consume_channel: consume_channel,
            _connection: connection,
            event_queue: config.amqp.event_queue.clone(),
            notifications,
        })
    }

    async fn publish(&self, event: &InboundEvent) -> Result<()> {
        MessageUtils::validate_event(event)?;
        let payload = MessageUtils::serialize_event(event)?;

        let mut properties = BasicProperties::default();
        properties
            .with_content_type("application/json")
            .with_persistence(true);

        self.publish_channel
            .basic_publish(
                properties,
                payload,
                BasicPublishArguments::new("", &self.event_queue),
            )
            .await
            .context("Failed to publish event")?;

        println!("📤 {} from '{}'", event.kind(), event.reply_to());
        Ok(())
    }

    fn drain(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|mut n| std::mem::take(&mut *n))
            .unwrap_or_default()
    }

    /// Print everything received within `wait`
    async fn show_notifications(&self, wait: Duration) -> Vec<Notification> {
        tokio::time::sleep(wait).await;
        let received = self.drain();
        if received.is_empty() {
            println!("(no notifications)");
        }
        for notification in &received {
            print_notification(notification);
        }
        received
    }

    async fn rotation(&self, participants: usize, wait: Duration) -> Result<()> {
        let run = uuid::Uuid::new_v4().simple().to_string();
        let ids: Vec<String> = (0..participants)
            .map(|i| format!("tester-{}-{}", &run[..8], i))
            .collect();

        for id in &ids {
            self.publish(&InboundEvent::Join {
                participant_id: id.clone(),
                referral_link: format!("https://referral.test/{}", id),
            })
            .await?;
        }

        let mut completed = 0;
        for _ in 0..participants * 2 {
            let assigned: Vec<String> = self
                .show_notifications(wait)
                .await
                .into_iter()
                .filter(|n| matches!(n.kind, NotificationKind::Assignment { .. }))
                .map(|n| n.recipient)
                .filter(|recipient| ids.contains(recipient))
                .collect();

            if assigned.is_empty() {
                break;
            }

            for id in assigned {
                self.publish(&InboundEvent::CompleteReferral { participant_id: id })
                    .await?;
                completed += 1;
            }
        }

        println!("✅ Rotation finished - {} referrals completed", completed);

        for id in &ids {
            self.publish(&InboundEvent::Leave {
                participant_id: id.clone(),
                requested_by: id.clone(),
            })
            .await?;
        }
        self.show_notifications(wait).await;
        Ok(())
    }
}

fn print_notification(notification: &Notification) {
    let icon = match notification.kind {
        NotificationKind::Reply => "💬",
        NotificationKind::Assignment { .. } => "🔗",
        NotificationKind::Broadcast => "📢",
    };
    println!("{} to '{}':", icon, notification.recipient);
    for line in notification.text.lines() {
        println!("   {}", line);
    }
}

struct NotificationTap {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

#[async_trait]
impl AsyncConsumer for NotificationTap {
    async fn consume(
        &mut self,
        _channel: &Channel,
        _deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        match MessageEnvelope::<Notification>::from_bytes(&content) {
            Ok(envelope) => {
                if let Ok(mut notifications) = self.notifications.lock() {
                    notifications.push(envelope.payload);
                }
            }
            Err(e) => eprintln!("⚠️  Undecodable notification: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(url) = &cli.amqp_url {
        config.amqp.url = url.clone();
    }

    println!("🔌 Connecting to RabbitMQ at: {}", config.amqp.url);
    let tester = match ExchangeTester::connect(&config).await {
        Ok(t) => {
            println!("✅ Connected to RabbitMQ successfully!");
            t
        }
        Err(e) => {
            eprintln!("❌ Failed to connect to RabbitMQ: {}", e);
            std::process::exit(1);
        }
    };

    let wait = Duration::from_secs(cli.wait);

    let event = match cli.command {
        Commands::Join { id, link } => InboundEvent::Join {
            participant_id: id,
            referral_link: link,
        },
        Commands::Done { id } => InboundEvent::CompleteReferral { participant_id: id },
        Commands::Leave { id, by } => InboundEvent::Leave {
            requested_by: by.unwrap_or_else(|| id.clone()),
            participant_id: id,
        },
        Commands::Info { id } => InboundEvent::QueryInfo { participant_id: id },
        Commands::Queue { admin, limit } => InboundEvent::QueryQueue {
            requested_by: admin,
            limit,
        },
        Commands::Stats { admin } => InboundEvent::QueryStats {
            requested_by: admin,
        },
        Commands::Broadcast { admin, text } => InboundEvent::Broadcast {
            requested_by: admin,
            text,
        },
        Commands::Monitor { duration } => {
            println!("👀 Monitoring notifications for {}s...", duration);
            tester
                .show_notifications(Duration::from_secs(duration))
                .await;
            return Ok(());
        }
        Commands::Rotation { participants } => {
            return tester.rotation(participants, wait).await;
        }
    };

    tester.publish(&event).await?;
    tester.show_notifications(wait).await;
    Ok(())
}
