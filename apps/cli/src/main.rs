use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    chat::chat_transcript,
    config::load_settings,
    resources::{
        caregiver_patients_query, chat_messages_query, dashboard_query, medical_profile_query,
        pair_device_mutation, recommendations_query, reset_password_mutation,
        send_chat_message_mutation, summary_query, update_settings_mutation, user_profiles_query,
        whoami_query,
    },
    ClientError, HealthApi, HttpHealthApi, NoticeLevel, Notices, Query, QueryClient,
    SessionContext, SessionProvider,
};
use serde::Serialize;
use shared::{
    domain::{Role, UserId},
    protocol::{PairDeviceRequest, ProfileSettingsUpdate, ResetPasswordRequest, SendChatMessage},
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "health_cli", about = "Command-line client for the health monitoring API")]
struct Args {
    /// Overrides `api_base_url` from client.toml and the environment.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long, requires = "password")]
    email: Option<String>,
    #[arg(long, requires = "email")]
    password: Option<String>,
    /// Reuses an access token instead of signing in.
    #[arg(long, conflicts_with = "email")]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Whoami,
    Profile,
    UserProfiles {
        #[arg(long)]
        user_id: i64,
    },
    /// Patients linked to a caregiver; defaults to the signed-in caregiver.
    Patients {
        #[arg(long)]
        caregiver_id: Option<i64>,
    },
    /// Role-dependent landing view.
    Dashboard,
    Recommendations,
    Summary,
    Settings {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long)]
        units: Option<String>,
    },
    PairDevice {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: Option<String>,
    },
    ResetPassword {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
    Chat {
        #[command(subcommand)]
        action: ChatCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ChatCommand {
    List {
        #[arg(long)]
        room: String,
    },
    Send {
        #[arg(long)]
        room: String,
        content: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let message = err
                .downcast_ref::<ClientError>()
                .map(ClientError::user_message)
                .unwrap_or_else(|| format!("{err:#}"));
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut settings = load_settings().context("failed to load client settings")?;
    if let Some(url) = args.api_base_url {
        settings.api_base_url = url;
    }
    info!(api_base_url = %settings.api_base_url, "health_cli: starting");

    let api: Arc<dyn HealthApi> = Arc::new(HttpHealthApi::from_settings(&settings)?);
    let session = SessionContext::new(Arc::clone(&api), QueryClient::from_settings(&settings));

    match (args.email, args.password) {
        (Some(email), Some(password)) => {
            session.sign_in(&email, &password).await?;
        }
        _ => {
            if let Some(token) = args.token {
                api.set_access_token(Some(token)).await;
            }
            session.initialize().await?;
        }
    }

    let notices = Notices::new();
    let mut toasts = notices.subscribe();
    let result = run_command(&session, &notices, args.command).await;
    drain_notices(&mut toasts);
    result
}

async fn run_command(session: &SessionContext, notices: &Notices, command: Command) -> Result<()> {
    let api = session.api();
    let queries = session.queries();
    let user = session.require_user().await?;

    match command {
        Command::Whoami => print_query(queries, whoami_query(api)).await,
        Command::Profile => print_query(queries, medical_profile_query(api)).await,
        Command::UserProfiles { user_id } => {
            print_query(queries, user_profiles_query(api, UserId(user_id))).await
        }
        Command::Patients { caregiver_id } => {
            let caregiver_id = caregiver_id.map(UserId).unwrap_or(user.id);
            print_query(queries, caregiver_patients_query(api, caregiver_id)).await
        }
        Command::Dashboard => match user.role {
            Role::Caregiver => print_query(queries, caregiver_patients_query(api, user.id)).await,
            _ => print_query(queries, dashboard_query(api)).await,
        },
        Command::Recommendations => print_query(queries, recommendations_query(api)).await,
        Command::Summary => print_query(queries, summary_query(api)).await,
        Command::Settings {
            full_name,
            phone,
            notifications,
            units,
        } => {
            let update = ProfileSettingsUpdate {
                full_name,
                phone,
                notifications_enabled: notifications,
                measurement_units: units,
            };
            let mutation = notices.attach(update_settings_mutation(api), "Settings saved.");
            print_json(&*mutation.mutate(queries, update).await?)
        }
        Command::PairDevice { code, name } => {
            let mutation = notices.attach(pair_device_mutation(api), "Device paired.");
            let request = PairDeviceRequest {
                device_code: code,
                device_name: name,
            };
            print_json(&*mutation.mutate(queries, request).await?)
        }
        Command::ResetPassword { current, new } => {
            let mutation = notices.attach(reset_password_mutation(api), "Password changed.");
            let request = ResetPasswordRequest {
                current_password: current,
                new_password: new,
            };
            print_json(&*mutation.mutate(queries, request).await?)
        }
        Command::Chat { action } => match action {
            ChatCommand::List { room } => {
                let messages = queries
                    .fetch_query(&chat_messages_query(api, &room))
                    .await
                    .into_result()?;
                for line in chat_transcript(&messages, user.id) {
                    println!(
                        "[{}] {}: {}",
                        line.sent_at.format("%Y-%m-%d %H:%M"),
                        line.author,
                        line.body
                    );
                }
                Ok(())
            }
            ChatCommand::Send { room, content } => {
                let mutation =
                    notices.attach(send_chat_message_mutation(api, &room), "Message sent.");
                print_json(&*mutation.mutate(queries, SendChatMessage { content }).await?)
            }
        },
    }
}

async fn print_query<T>(queries: &QueryClient, query: Query<T>) -> Result<()>
where
    T: Serialize + Send + Sync + 'static,
{
    let key = query.key().to_string();
    let state = queries.fetch_query(&query).await;
    if state.is_pending() {
        anyhow::bail!("'{key}' is not available for these arguments");
    }
    print_json(&*state.into_result()?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn drain_notices(toasts: &mut broadcast::Receiver<client_core::Notice>) {
    while let Ok(notice) = toasts.try_recv() {
        match notice.level {
            NoticeLevel::Success => eprintln!("{}", notice.message),
            NoticeLevel::Error => warn!(message = %notice.message, "health_cli: command failed"),
        }
    }
}
