use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse::config::{Config, MAX_NOTIFICATION_DAYS};
use pulse::context::AppContext;
use pulse::models::{NewNotification, NotificationCategory, NotificationPriority, NotificationQuery};
use pulse::storage;

#[derive(Parser)]
#[command(name = "pulse-admin")]
#[command(about = "Pulse notification and analytics maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a notification (stored only, no live broadcast)
    Notify {
        /// user, survey, response, ai or system
        category: String,
        /// high, medium or low
        priority: String,
        title: String,
        message: String,
        #[arg(long)]
        link: Option<String>,
    },
    /// List notifications visible to the admin scope
    List {
        /// Only unread notifications
        #[arg(long)]
        unread: bool,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Mark every notification as read
    MarkAllRead,
    /// Delete notifications older than the retention window
    Cleanup {
        /// Retention in days (defaults to NOTIFICATION_RETENTION_DAYS)
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_NOTIFICATION_DAYS))]
        days: Option<i64>,
    },
    /// Recompute and print analytics for a survey
    Analytics { survey_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::connect(&config.database).await?;

    // Ensure database is initialized
    storage.init().await?;

    // No background tasks: the context is only used for its services
    let ctx = AppContext::new(config, storage);

    match cli.command {
        Commands::Notify {
            category,
            priority,
            title,
            message,
            link,
        } => {
            let category: NotificationCategory = category.parse()?;
            let priority: NotificationPriority = priority.parse()?;
            let mut new = NewNotification::new(category, priority, title, message);
            if let Some(link) = link {
                new = new.with_link(link);
            }
            let notification = ctx.notifications.create_notification(new).await?;
            println!(
                "✓ Created notification {} ({}, expires {})",
                notification.id,
                notification.kind.as_str(),
                notification
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
        Commands::List { unread, limit } => {
            let query = NotificationQuery {
                is_read: unread.then_some(false),
                limit,
                ..Default::default()
            };
            let notifications = ctx.notifications.get_notifications(&query).await?;
            if notifications.is_empty() {
                println!("No notifications found.");
            } else {
                println!(
                    "{:<8} {:<6} {:<10} {:<8} {:<6} {}",
                    "ID", "Type", "Category", "Priority", "Read", "Title"
                );
                println!("{}", "-".repeat(80));
                for n in notifications {
                    println!(
                        "{:<8} {:<6} {:<10} {:<8} {:<6} {}",
                        n.id,
                        n.kind.as_str(),
                        n.category,
                        n.priority,
                        if n.is_read { "yes" } else { "no" },
                        n.title
                    );
                }
            }
        }
        Commands::MarkAllRead => {
            let updated = ctx.notifications.mark_all_as_read().await?;
            println!("✓ Marked {} notification(s) as read", updated);
        }
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(ctx.config.notifications.retention_days);
            let deleted = ctx.notifications.cleanup_older_than(days).await?;
            println!("✓ Deleted {} notification(s) older than {} days", deleted, days);
        }
        Commands::Analytics { survey_id } => {
            let analytics = ctx
                .metrics
                .get_real_time_survey_analytics(&survey_id)
                .await
                .with_context(|| format!("Analytics for survey '{survey_id}' unavailable"))?;
            println!("{}", serde_json::to_string_pretty(analytics.as_ref())?);
        }
    }

    Ok(())
}
