use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use clap::{CommandFactory, Parser};
use ech_workers_client::{
    acquire_instance_lock, channel_sink, color_enabled_stderr, config,
    display_for_control_error, exit_code_for_control_error, log_error_stderr, log_info_stderr,
    log_warn_stderr, relay, supervisor, sysproxy, telemetry, ui, App, ControlError, OutputLine,
    Profile, StartOutcome, StopReason, StreamKind, SupervisorEvent,
};

mod cli;
mod signals;

use cli::{AutostartCmd, Cli, Command, ProfileCmd, ProxyCmd};

/// How long the run loop waits for output before re-checking events and signals.
const RUN_TICK: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let cli = Cli::parse_from(cli::normalize_args(env::args_os()));
    if let Some(mode) = cli.color {
        ech_workers_client::set_color_mode(mode);
    }
    telemetry::init(cli.verbose);

    let config = config::config_path(cli.config.as_deref());
    let result = match cli.command.clone() {
        None if cli.autostart => run_worker(&config, cli.system_proxy, None),
        None => {
            let _ = Cli::command().print_help();
            Ok(0)
        }
        Some(Command::Run {
            system_proxy,
            profile,
        }) => run_worker(&config, system_proxy, profile.as_deref()),
        Some(Command::Profile { cmd }) => run_profile(&config, cmd).map(|_| 0),
        Some(Command::Proxy { cmd }) => run_proxy(cmd).map(|_| 0),
        Some(Command::Autostart { cmd }) => run_autostart(&config, cmd).map(|_| 0),
        Some(Command::Doctor) => {
            run_doctor(&config, cli.verbose);
            Ok(0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log_error_stderr(color_enabled_stderr(), &display_for_control_error(&e));
            ExitCode::from(exit_code_for_control_error(&e))
        }
    }
}

fn report_warnings(app: &mut App) {
    let use_err = color_enabled_stderr();
    for w in app.take_warnings() {
        log_warn_stderr(use_err, &display_for_control_error(&w));
    }
}

/// Profile and autostart commands never start a worker, so the proxy
/// backend is irrelevant to them.
fn open_offline(config: &Path) -> Result<App, ControlError> {
    let mut app = App::open(config, relay::null_sink())?;
    report_warnings(&mut app);
    Ok(app)
}

fn print_line(line: OutputLine) {
    match line.stream {
        StreamKind::Stdout => println!("{}", line.text),
        StreamKind::Stderr => eprintln!("{}", line.text),
    }
}

fn drain_pending(lines: &Receiver<OutputLine>) {
    while let Ok(line) = lines.try_recv() {
        print_line(line);
    }
}

fn run_worker(config: &Path, system_proxy: bool, profile: Option<&str>) -> Result<u8, ControlError> {
    let use_err = color_enabled_stderr();
    let _lock = acquire_instance_lock(&config::lock_path_for(config))?;

    let (sink, lines) = channel_sink();
    let mut app = App::open(config, sink)?;
    report_warnings(&mut app);
    if let Some(id) = profile {
        app.select_profile(id)?;
    }
    let events = app.supervisor().subscribe();
    signals::install();

    let name = app.active().map(|p| p.name.clone()).unwrap_or_default();
    let started = app.start();
    report_warnings(&mut app);
    match started? {
        StartOutcome::Started { pid } | StartOutcome::AlreadyRunning { pid } => {
            log_info_stderr(use_err, &format!("worker started for '{name}' (pid {pid})"));
        }
    }

    if system_proxy {
        match app.enable_system_proxy() {
            Ok(()) => log_info_stderr(use_err, "system proxy enabled"),
            Err(e) => log_warn_stderr(use_err, &display_for_control_error(&e)),
        }
    }

    let mut exit_code = 0u8;
    loop {
        match lines.recv_timeout(RUN_TICK) {
            Ok(line) => {
                print_line(line);
                drain_pending(&lines);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(RUN_TICK),
        }

        match events.try_recv() {
            Ok(SupervisorEvent::Stopped {
                reason: StopReason::Exited(code),
            }) => {
                drain_pending(&lines);
                let code_text = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                log_warn_stderr(use_err, &format!("worker exited unexpectedly ({code_text})"));
                exit_code = 1;
                break;
            }
            Ok(SupervisorEvent::SystemProxyChanged(false)) => {
                log_info_stderr(use_err, "system proxy disabled");
            }
            Ok(_) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        if signals::shutdown_requested() {
            log_info_stderr(use_err, "shutting down");
            break;
        }
    }

    app.shutdown();
    drain_pending(&lines);
    Ok(exit_code)
}

/// A `run` in another process holds the instance lock for as long as its worker lives.
fn worker_running_elsewhere(config: &Path) -> bool {
    matches!(
        acquire_instance_lock(&config::lock_path_for(config)),
        Err(ControlError::AlreadyRunningInstance)
    )
}

fn print_profile(p: &Profile) {
    println!("id:     {}", p.id());
    println!("name:   {}", p.name);
    println!("server: {}", p.remote_address);
    println!("listen: {}", p.listen_address);
    println!(
        "token:  {}",
        if p.auth_token.trim().is_empty() {
            ""
        } else {
            "***"
        }
    );
    println!("ip:     {}", p.preferred_ip);
    println!("dns:    {}", p.doh_resolver);
    println!("ech:    {}", p.ech_domain);
}

fn active_id(app: &App) -> Result<String, ControlError> {
    app.active()
        .map(|p| p.id().to_string())
        .ok_or_else(|| ControlError::ProfileNotFound(String::new()))
}

fn run_profile(config: &Path, cmd: ProfileCmd) -> Result<(), ControlError> {
    let use_err = color_enabled_stderr();
    let mut app = open_offline(config)?;
    match cmd {
        ProfileCmd::List => {
            let active = active_id(&app)?;
            for p in app.profiles().profiles() {
                let mark = if p.id() == active { '*' } else { ' ' };
                println!("{mark} {}  {}  {}", p.id(), p.name, p.remote_address);
            }
        }
        ProfileCmd::Show { id } => {
            let p = match id {
                Some(id) => app
                    .profiles()
                    .get(&id)
                    .ok_or_else(|| ControlError::ProfileNotFound(id.clone()))?,
                None => app
                    .active()
                    .ok_or_else(|| ControlError::ProfileNotFound(String::new()))?,
            };
            print_profile(p);
        }
        ProfileCmd::Add { name } => {
            let id = app.add_profile(&name, None)?;
            log_info_stderr(use_err, &format!("added profile '{}' ({id})", name.trim()));
        }
        ProfileCmd::Save {
            server,
            listen,
            token,
            ip,
            dns,
            ech,
        } => {
            let mut draft = app
                .active()
                .cloned()
                .ok_or_else(|| ControlError::ProfileNotFound(String::new()))?;
            let edits = [
                (server, &mut draft.remote_address),
                (listen, &mut draft.listen_address),
                (token, &mut draft.auth_token),
                (ip, &mut draft.preferred_ip),
                (dns, &mut draft.doh_resolver),
                (ech, &mut draft.ech_domain),
            ];
            for (value, field) in edits {
                if let Some(v) = value {
                    *field = v;
                }
            }
            app.save_profile(&draft)?;
            log_info_stderr(use_err, "profile saved");
        }
        ProfileCmd::Rename { name, id } => {
            let id = match id {
                Some(id) => id,
                None => active_id(&app)?,
            };
            app.rename_profile(&id, &name)?;
        }
        ProfileCmd::Delete { id, yes } => {
            let id = match id {
                Some(id) => id,
                None => active_id(&app)?,
            };
            let name = app
                .profiles()
                .get(&id)
                .map(|p| p.name.clone())
                .ok_or_else(|| ControlError::ProfileNotFound(id.clone()))?;
            if app.profiles().len() <= 1 {
                return Err(ControlError::LastProfile);
            }
            if id == active_id(&app)? && worker_running_elsewhere(config) {
                return Err(ControlError::SelectWhileRunning);
            }
            if !yes && !ui::warn::confirm(&format!("Delete profile '{name}'?")) {
                if !ui::warn::is_interactive() {
                    ui::warn::warn_print("not deleting without --yes in a non-interactive session");
                }
                return Ok(());
            }
            app.delete_profile(&id)?;
            log_info_stderr(use_err, &format!("deleted profile '{name}'"));
        }
        ProfileCmd::Select { id } => {
            if worker_running_elsewhere(config) {
                return Err(ControlError::SelectWhileRunning);
            }
            app.select_profile(&id)?;
        }
    }
    report_warnings(&mut app);
    Ok(())
}

fn run_proxy(cmd: ProxyCmd) -> Result<(), ControlError> {
    let proxy = sysproxy::platform_system_proxy();
    match cmd {
        ProxyCmd::Status => {
            let snap = proxy.snapshot()?;
            println!("backend: {}", proxy.name());
            println!("enabled: {}", if snap.enabled { "yes" } else { "no" });
            println!("server:  {}", snap.server.as_deref().unwrap_or("(none)"));
            if let Some(bypass) = snap.bypass.as_deref() {
                println!("bypass:  {bypass}");
            }
        }
        ProxyCmd::Off => {
            proxy.disable()?;
            log_info_stderr(color_enabled_stderr(), "system proxy disabled");
        }
    }
    Ok(())
}

fn run_autostart(config: &Path, cmd: AutostartCmd) -> Result<(), ControlError> {
    let app = open_offline(config)?;
    match cmd {
        AutostartCmd::Status => {
            let on = app.autostart_enabled()?;
            println!("{}: {}", app.autostart_backend(), if on { "on" } else { "off" });
        }
        AutostartCmd::On => app.set_autostart(true)?,
        AutostartCmd::Off => app.set_autostart(false)?,
    }
    Ok(())
}

fn run_doctor(config: &Path, verbose: bool) {
    eprintln!("ech-workers-client doctor");
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  host: {} / {}", env::consts::OS, env::consts::ARCH);
    if verbose {
        eprintln!("  build date: {}", env!("ECHW_BUILD_DATE"));
        eprintln!("  build target: {}", env!("ECHW_BUILD_TARGET"));
        eprintln!("  build profile: {}", env!("ECHW_BUILD_PROFILE"));
        eprintln!("  rustc: {}", env!("ECHW_BUILD_RUSTC"));
    }
    eprintln!("  config: {}", config.display());

    let options = supervisor::SupervisorOptions::from_env();
    match options.resolve() {
        Ok(p) => eprintln!("  worker: {}", p.display()),
        Err(e) => eprintln!("  worker: not found ({e})"),
    }
    eprintln!("  stop timeout: {:?}", options.stop_timeout);

    match open_offline(config) {
        Ok(app) => {
            if let Some(p) = app.active() {
                eprintln!("  active profile: {} ({})", p.name, p.id());
                let args = supervisor::launch_args(p);
                eprintln!("  launch: {}", supervisor::preview(&options.worker, &args));
            }
            match app.autostart_enabled() {
                Ok(on) => eprintln!(
                    "  autostart ({}): {}",
                    app.autostart_backend(),
                    if on { "on" } else { "off" }
                ),
                Err(e) => eprintln!("  autostart: unknown ({e})"),
            }
        }
        Err(e) => eprintln!("  profiles: unavailable ({e})"),
    }

    let proxy = sysproxy::platform_system_proxy();
    match proxy.snapshot() {
        Ok(s) => eprintln!(
            "  system proxy ({}): {}{}",
            proxy.name(),
            if s.enabled { "on" } else { "off" },
            s.server.map(|v| format!(" [{v}]")).unwrap_or_default()
        ),
        Err(e) => eprintln!("  system proxy ({}): unknown ({e})", proxy.name()),
    }

    eprintln!("doctor: completed diagnostics.");
}
