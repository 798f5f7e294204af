use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use task_queue_client::TaskQueueAsyncClient;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "tq-admin")]
#[command(about = "Task Queue Admin CLI", long_about = None)]
struct Args {
    /// Broker address
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    broker: String,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a task to a queue
    Add {
        queue: String,

        /// Task payload; its byte length is sent as the declared length
        data: String,
    },

    /// Lease the next task from a queue
    Get { queue: String },

    /// Acknowledge (remove) a task
    Ack { queue: String, task_id: String },

    /// Check whether a queue still holds a task
    In { queue: String, task_id: String },

    /// Ask the broker to write a snapshot
    Save,

    /// Send a raw protocol line and print the reply
    Raw { line: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut client = TaskQueueAsyncClient::connect(args.broker.as_str()).await?;

    match args.command {
        Commands::Add { queue, data } => {
            let task_id = client.add(&queue, &data).await?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::json!({ "task_id": task_id })),
                _ => println!("{}", task_id),
            }
        }

        Commands::Get { queue } => {
            let task = client.get(&queue).await?;

            match (args.format.as_str(), task) {
                ("json", task) => println!(
                    "{}",
                    serde_json::json!({
                        "task": task.map(|t| serde_json::json!({
                            "task_id": t.id,
                            "length": t.length,
                            "data": t.data,
                        })),
                    })
                ),
                ("table", Some(task)) => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Field", "Value"]);
                    table.add_row(vec!["ID", &task.id.to_string()]);
                    table.add_row(vec!["Queue", &queue]);
                    table.add_row(vec!["Length", &task.length.to_string()]);
                    table.add_row(vec!["Data", &task.data]);
                    println!("{table}");
                }
                (_, Some(task)) => println!("{}", task),
                (_, None) => println!("NONE"),
            }
        }

        Commands::Ack { queue, task_id } => {
            let task_id = Uuid::parse_str(&task_id)?;
            let acked = client.ack(&queue, &task_id).await?;
            print_bool(&args.format, "acknowledged", acked);
        }

        Commands::In { queue, task_id } => {
            let task_id = Uuid::parse_str(&task_id)?;
            let present = client.contains(&queue, &task_id).await?;
            print_bool(&args.format, "present", present);
        }

        Commands::Save => {
            client.save().await?;
            match args.format.as_str() {
                "json" => println!("{}", serde_json::json!({ "saved": true })),
                _ => println!("OK"),
            }
        }

        Commands::Raw { line } => {
            println!("{}", client.send_raw(&line).await?);
        }
    }

    Ok(())
}

fn print_bool(format: &str, key: &str, value: bool) {
    match format {
        "json" => println!("{}", serde_json::json!({ key: value })),
        _ => println!("{}", if value { "YES" } else { "NO" }),
    }
}
