//! wardwatch CLI
//!
//! Command-line interface against a running wardwatch server:
//! - Check status
//! - List rows of any table
//! - Show the bed board and the patient queue
//! - Change a bed's status
//! - Send notifications
//! - Provision staff rows for new accounts
//! - Generate a config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use wardwatch::auth::{onboard, Role, StaffSignup};
use wardwatch::config::{generate_default_config, Config};
use wardwatch::dashboard::{department_name, format_wait};
use wardwatch::model::{
    Bed, BedStatus, Department, Filter, Patient, Query, QueueItem, QueueStatus, Table,
};
use wardwatch::realtime::ChangeFeed;
use wardwatch::store::{Backend, BackendExt, NotificationRequest, RemoteBackend};

#[derive(Parser)]
#[command(name = "wardwatch-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hospital resource management from the command line")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Server URL (default: from config)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Anonymous API key (default: from config)
    #[arg(long, global = true)]
    pub anon_key: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show server status
    Status,

    /// List rows of a table
    List {
        /// departments, beds, patients, patient_queue, staff, equipment, notifications
        table: String,
        /// Filters like status=eq.available (repeatable)
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
        /// Ordering like priority.asc,created_at.asc
        #[arg(short, long)]
        order: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show beds, optionally for one department
    Beds {
        #[arg(short, long)]
        department: Option<String>,
    },

    /// Show the patient queue in service order
    Queue {
        #[arg(short, long)]
        department: Option<String>,
    },

    /// Change a bed's status
    SetBedStatus {
        /// Bed id
        id: String,
        /// available, occupied, reserved, cleaning
        status: String,
    },

    /// Send a notification to one user, or to every staff member
    Notify {
        title: String,
        message: String,
        /// Recipient user id (default: all staff with a login)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Create the staff row for a newly registered user
    Onboard {
        user_id: String,
        full_name: String,
        email: String,
        /// admin, medical_staff, reception
        #[arg(short, long, default_value = "medical_staff")]
        role: String,
    },

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_default();
    if let Some(url) = &cli.url {
        config.backend.url = url.clone();
    }
    if let Some(key) = &cli.anon_key {
        config.backend.anon_key = key.clone();
    }
    let json_output = cli.format == "json";

    let backend = RemoteBackend::new(config.remote_config(), Arc::new(ChangeFeed::new(1)))?;

    match cli.command {
        Commands::Status => {
            let url = format!("{}/health", backend.config().base_url);
            let response = reqwest::get(&url).await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: Value = resp.json().await?;
                    if json_output {
                        println!("{}", serde_json::to_string_pretty(&health)?);
                        return Ok(());
                    }

                    println!("wardwatch v{}", env!("CARGO_PKG_VERSION"));
                    println!();
                    println!("Server:  {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Storage: {}", health["storage"].as_str().unwrap_or("unknown"));
                    println!(
                        "Realtime connections: {}",
                        health["realtime_connections"].as_u64().unwrap_or(0)
                    );
                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!("Uptime: {}", format_duration(uptime));
                    }
                }
                Ok(resp) => bail!("Server returned error: {}", resp.status()),
                Err(e) => {
                    eprintln!("Cannot connect to wardwatch at {}", backend.config().base_url);
                    eprintln!();
                    eprintln!("Make sure the server is running:");
                    eprintln!("  cargo run --bin wardwatch -- --seed");
                    return Err(e.into());
                }
            }
        }

        Commands::List {
            table,
            filters,
            order,
            limit,
        } => {
            let table: Table = table.parse()?;
            let query = build_query(&filters, order.as_deref(), limit)?;
            let rows = backend.select(table, &query).await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_rows(&rows);
            }
        }

        Commands::Beds { department } => {
            let mut query = Query::new().asc("bed_number");
            if let Some(dept) = &department {
                query = query.eq("department_id", dept.as_str());
            }
            let beds: Vec<Bed> = backend.fetch(&query).await?;
            let departments: Vec<Department> = backend.fetch(&Query::new()).await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&beds)?);
                return Ok(());
            }
            if beds.is_empty() {
                println!("No beds found.");
                return Ok(());
            }

            println!("{:<14} {:<10} {:<14} {}", "ID", "Bed", "Status", "Department");
            println!("{}", "-".repeat(60));
            for bed in &beds {
                println!(
                    "{:<14} {:<10} {:<14} {}",
                    bed.id,
                    bed.bed_number,
                    bed.status.label(),
                    department_name(&departments, Some(&bed.department_id))
                );
            }

            let available = beds.iter().filter(|b| b.status == BedStatus::Available).count();
            println!();
            println!("{} of {} beds available", available, beds.len());
        }

        Commands::Queue { department } => {
            let mut query = Query::new()
                .filter(Filter::eq("status", QueueStatus::Waiting.as_str()))
                .asc("priority")
                .asc("created_at");
            if let Some(dept) = &department {
                query = query.eq("department_id", dept.as_str());
            }
            let queue: Vec<QueueItem> = backend.fetch(&query).await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&queue)?);
                return Ok(());
            }
            if queue.is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }

            let patients: HashMap<String, String> = backend
                .fetch::<Patient>(&Query::new())
                .await?
                .into_iter()
                .map(|p| (p.id, p.full_name))
                .collect();

            println!("{:<4} {:<22} {:<12} {}", "#", "Patient", "Priority", "Wait");
            println!("{}", "-".repeat(50));
            for (position, item) in queue.iter().enumerate() {
                println!(
                    "{:<4} {:<22} {:<12} {}",
                    position + 1,
                    patients
                        .get(&item.patient_id)
                        .map(String::as_str)
                        .unwrap_or("Unknown Patient"),
                    item.priority.label(),
                    format_wait(item.estimated_wait_time)
                );
            }
        }

        Commands::SetBedStatus { id, status } => {
            let status: BedStatus = serde_json::from_value(Value::String(status.clone()))
                .with_context(|| format!("unknown bed status '{}'", status))?;
            let bed: Bed = backend
                .update_by_id(&id, json!({ "status": status, "updated_at": chrono::Utc::now() }))
                .await?;
            println!("Bed {} is now {}", bed.bed_number, bed.status.label());
        }

        Commands::Notify {
            title,
            message,
            user,
        } => {
            let request = match user {
                Some(user) => NotificationRequest::to_user(user, title, message),
                None => NotificationRequest::broadcast(title, message),
            };
            let outcome = backend.create_notification(request).await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if let Some(count) = outcome.count {
                println!("Notified {} staff members", count);
            } else if let Some(created) = outcome.data {
                println!("Notification {} sent to {}", created.id, created.user_id);
            }
        }

        Commands::Onboard {
            user_id,
            full_name,
            email,
            role,
        } => {
            let role: Role = serde_json::from_value(Value::String(role.clone()))
                .with_context(|| format!("unknown role '{}'", role))?;
            let done = onboard(
                &backend,
                StaffSignup {
                    user_id,
                    full_name,
                    email,
                    role,
                },
            )
            .await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&done.staff)?);
            } else {
                println!("Staff {} created as {}", done.staff.id, role.label());
                if let Some(dept) = done.department {
                    println!("Assigned to {}", dept.name);
                }
            }
        }

        Commands::InitConfig { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn build_query(filters: &[String], order: Option<&str>, limit: Option<usize>) -> anyhow::Result<Query> {
    let mut params: Vec<(&str, &str)> = Vec::new();
    for filter in filters {
        match filter.split_once('=') {
            Some(pair) => params.push(pair),
            None => bail!("Invalid filter '{}'. Use: column=eq.value", filter),
        }
    }
    if let Some(order) = order {
        params.push(("order", order));
    }

    let mut query = Query::from_params(params).map_err(anyhow::Error::msg)?;
    query.limit = limit;
    Ok(query)
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

fn print_rows(rows: &[Value]) {
    if rows.is_empty() {
        println!("No rows");
        return;
    }

    for row in rows {
        let Some(object) = row.as_object() else {
            continue;
        };
        let id = object.get("id").and_then(Value::as_str).unwrap_or("-");
        let fields = object
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "id" | "created_at" | "updated_at"))
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join("  ");
        println!("{:<16} {}", id, fields);
    }
    println!();
    println!("{} rows", rows.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        let filters = vec!["department_id=eq.dept-1".to_string()];
        let query = build_query(&filters, Some("priority.asc"), Some(5)).unwrap();
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters[0].column, "department_id");
        assert_eq!(query.order.len(), 1);
        assert!(query.order[0].ascending);
        assert_eq!(query.limit, Some(5));

        assert!(build_query(&["status".to_string()], None, None).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m");
        assert_eq!(format_duration(90000), "1d 1h");
    }
}
