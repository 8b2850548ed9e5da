mod cli;
mod error;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use owo_colors::OwoColorize;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use dahua_api::{
    AuthMethod, Device, DeviceConfig, DeviceEvent, EventCallback, IdlePolicy, ReconnectConfig,
    TlsMode, TransportConfig,
};

use crate::cli::{Cli, Command, GlobalOpts, InfoArgs, WatchArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let device = Arc::new(build_device(&cli.global, &cli.command)?);

    match cli.command {
        Command::Info(args) => info(&device, &args).await,
        Command::Watch(args) => watch(&device, args).await,
    }
}

/// Build a `Device` from CLI flags / env vars.
fn build_device(global: &GlobalOpts, command: &Command) -> Result<Device, CliError> {
    let host = global.host.clone().ok_or(CliError::NoHost)?;
    let password = global.password.clone().ok_or(CliError::NoPassword)?;
    let auth: AuthMethod = global
        .auth
        .parse()
        .map_err(|e: dahua_api::Error| CliError::Config {
            message: e.to_string(),
        })?;

    let mut config = DeviceConfig::new(
        host,
        global.username.clone(),
        SecretString::from(password),
        global.channel_offset,
    );
    config.port = global.port;
    config.use_tls = global.tls;
    config.auth = auth;

    if let Command::Watch(args) = command {
        config.monitored_codes.clone_from(&args.codes);
        config.alarm_channel = args.alarm_channel;
    }

    let transport = TransportConfig {
        tls: if global.verify_tls {
            TlsMode::System
        } else {
            TlsMode::DangerAcceptInvalid
        },
        ..TransportConfig::default()
    };

    Ok(Device::new(config, &transport)?)
}

/// `dahua info`: run the joined info queries and print the result.
async fn info(device: &Arc<Device>, args: &InfoArgs) -> Result<(), CliError> {
    let info = device.get_info().await?;
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&info)?
    } else {
        serde_json::to_string(&info)?
    };
    println!("{rendered}");
    Ok(())
}

/// `dahua watch`: stream events to stdout until Ctrl-C.
async fn watch(device: &Arc<Device>, args: WatchArgs) -> Result<(), CliError> {
    if args.resolve_names {
        // best-effort: streaming still works against an unnamed registry
        if let Err(e) = device.get_channel_titles().await.map(|titles| {
            for (number, name) in titles {
                device.channels().upsert(number, name);
            }
        }) {
            tracing::warn!(error = %e, "could not fetch channel titles");
        }
    }

    let listener = device.create_listener(ReconnectConfig {
        retry_delay: Duration::from_secs(args.retry_delay.max(1)),
        idle_policy: if args.idle_backoff {
            IdlePolicy::Delayed
        } else {
            IdlePolicy::Immediate
        },
    });

    let channel_filter = args.channels.clone();
    let json = args.json;
    let callback: EventCallback = Arc::new(move |event: &DeviceEvent| {
        if let Some(number) = event.channel_number {
            if !channel_filter.is_empty() && !channel_filter.contains(&number) {
                return;
            }
        }
        print_event(event, json);
    });
    listener.add_event_callback(callback);

    tracing::info!(host = device.host(), "watching for events (Ctrl-C to stop)");
    let handle = listener.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown();
    handle.join().await;
    Ok(())
}

fn print_event(event: &DeviceEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "could not serialize event"),
        }
        return;
    }

    let action = event.action.as_deref().unwrap_or("-");
    let channel = match (event.channel_number, event.channel_name()) {
        (Some(number), Some(name)) => format!("{number} ({name})"),
        (Some(number), None) => number.to_string(),
        _ => "-".to_string(),
    };
    println!(
        "{:<24} {:<8} channel {}",
        event.code.green().bold(),
        action.cyan(),
        channel
    );
}
