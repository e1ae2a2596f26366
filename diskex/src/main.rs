use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use console::{Term, style};
use diskex_core::device::Device;
use diskex_core::error::InventoryError;
use diskex_core::interrupt::Interrupts;
use diskex_core::inventory;
use diskex_core::platform::{SystemInventory, SystemVolumes};
use diskex_core::progress::format_size;
use diskex_core::session::{ExerciseEvent, ExerciseObserver, ExerciseOptions, ExerciseSession, SessionState};
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stdout};
use std::sync::Arc;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

mod logging;

#[derive(Parser)]
#[command(name = "diskex")]
#[command(
    about = "Exercise external disks with a full sequential read to surface latent sector errors",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    /// Do not re-launch through sudo when not running as root
    #[arg(long = "no-elevate", global = true)]
    no_elevate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a whole device from start to end interactively (the default)
    Exercise {
        /// Device to exercise (e.g. disk4 or sdb); prompts when omitted
        device: Option<String>,

        /// Size of each raw read, e.g. 64K or 1M
        #[arg(long = "chunk-size", value_name = "SIZE", value_parser = parse_chunk_size, default_value = "1M")]
        options: ExerciseOptions,
    },
    /// List external physical devices with their size and SMART status
    List,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Exercise {
            device: None,
            options: ExerciseOptions::default(),
        }
    }
}

/// Parses a chunk size with an optional binary suffix (`K`, `M`).
fn parse_chunk_size(s: &str) -> Result<ExerciseOptions, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("missing numeric value in '{s}'"));
    }
    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid number '{digits}'"))?;
    let multiplier = match suffix.trim().to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        other => return Err(format!("unknown size suffix '{other}'")),
    };
    ExerciseOptions::with_chunk_size(value.saturating_mul(multiplier))
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// By disabling it, the interrupt path can print its own message. The original
/// terminal state is restored when this struct is dropped, and by the exit
/// hook handed to the interrupt listener, which leaves via
/// `std::process::exit` and so never runs destructors.
#[derive(Clone)]
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            if !stdout().is_terminal() {
                return Self {
                    original_termios: None,
                };
            }

            let original_termios = Termios::from_fd(fd).ok().and_then(|original| {
                let mut quiet = original;
                // Disable printing of control characters.
                quiet.c_lflag &= !ECHOCTL;
                tcsetattr(fd, TCSANOW, &quiet).ok().map(|_| original)
            });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            // This is a no-op on non-Unix platforms.
            Self {}
        }
    }

    fn restore(&self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            let fd = stdout().as_raw_fd();
            tcsetattr(fd, TCSANOW, original_termios).ok();
        }
    }

    /// The process exit used after an interrupt.
    fn exit_hook(&self) -> impl Fn(i32) + Send + Sync + 'static {
        let restorer = self.clone();
        move |code| {
            restorer.restore();
            Term::stdout().show_cursor().ok();
            std::process::exit(code);
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Re-launches the current command line through `sudo` unless already root.
#[cfg(unix)]
fn elevate() -> Result<()> {
    use std::os::unix::process::CommandExt;

    if nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    let exe = std::env::current_exe().context("could not determine executable path")?;
    tracing::debug!(exe = %exe.display(), "re-launching through sudo");
    let err = std::process::Command::new("sudo")
        .arg(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(anyhow!("could not re-launch with sudo: {err}"))
}

#[cfg(not(unix))]
fn elevate() -> Result<()> {
    Ok(())
}

/// Renders session events: status lines, the progress bar and warnings.
struct CliObserver {
    device: String,
    bar: ProgressBar,
}

impl CliObserver {
    fn new(device: &Device) -> Self {
        Self {
            device: device.name.clone(),
            bar: ProgressBar::hidden(),
        }
    }

    fn start_bar(&self, total_bytes: u64) {
        let style = if total_bytes > 0 {
            self.bar.set_length(total_bytes);
            ProgressStyle::with_template(
                "{prefix:8} [{elapsed_precise}] [{bar:40.green/black}] {msg} ({bytes_per_sec}, {eta})",
            )
            .map(|s| s.progress_chars("■ "))
        } else {
            ProgressStyle::with_template("{prefix:8} [{elapsed_precise}] {spinner} {msg} ({bytes_per_sec})")
        };
        self.bar.set_style(style.unwrap_or_else(|_| ProgressStyle::default_bar()));
        self.bar.set_prefix("Reading");
        self.bar.set_draw_target(ProgressDrawTarget::stdout());
    }
}

impl ExerciseObserver for CliObserver {
    fn on_event(&self, event: &ExerciseEvent) {
        match event {
            ExerciseEvent::State(SessionState::Unmounting) => {
                println!("Unmounting {}...", self.device);
            }
            ExerciseEvent::Unmounted { output } | ExerciseEvent::Remounted { output } => {
                if !output.is_empty() {
                    println!("{output}");
                }
            }
            ExerciseEvent::ReadStarted {
                raw_path,
                total_bytes,
            } => {
                println!("Reading {}...", style(raw_path.display()).cyan());
                self.start_bar(*total_bytes);
            }
            ExerciseEvent::Progress(progress) => {
                self.bar.set_position(progress.bytes_read);
                self.bar.set_message(progress.render());
            }
            ExerciseEvent::State(SessionState::Completed) => self.bar.finish(),
            ExerciseEvent::State(SessionState::ReadFailed) => self.bar.abandon(),
            ExerciseEvent::State(SessionState::Interrupted) => {
                self.bar.abandon();
                eprintln!("\n{}", style("Interrupted.").yellow().bold());
            }
            ExerciseEvent::Remounting => println!("Remounting {}...", self.device),
            ExerciseEvent::RemountFailed(e) => {
                eprintln!("{} remount failed: {e}", style("warning:").yellow().bold());
                eprintln!(
                    "  {} was left unmounted and has to be mounted again by hand.",
                    self.device
                );
            }
            _ => {}
        }
    }
}

fn report_failures(failures: &[(String, InventoryError)]) {
    for (name, err) in failures {
        eprintln!("{} could not query {name}: {err}", style("error:").red().bold());
    }
}

fn print_devices(devices: &[Device]) {
    println!("{:>2}  {:<8}  {:<10}  {}", "#", "Disk", "Size", "SMART Status");
    for (i, device) in devices.iter().enumerate() {
        println!("{:>2}  {}", i + 1, device);
    }
}

/// Presents an interactive menu for the operator to select a device.
///
/// Returns `None` when the operator chooses to quit.
fn select_device(devices: &[Device]) -> Result<Option<Device>> {
    let mut items: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
    items.push("Quit".to_string());

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the device to exercise")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(devices.get(selection).cloned())
}

/// Presents a final "Yes/No" confirmation to the operator.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn list() -> Result<()> {
    let discovery = inventory::discover(&SystemInventory::new())?;
    report_failures(&discovery.failures);
    if discovery.devices.is_empty() {
        println!("No external physical drives found.");
        return Ok(());
    }
    print_devices(&discovery.devices);
    Ok(())
}

fn exercise(name: Option<String>, options: ExerciseOptions, interrupts: &Interrupts) -> Result<()> {
    let discovery = inventory::discover(&SystemInventory::new())?;
    report_failures(&discovery.failures);
    if discovery.devices.is_empty() {
        println!("No external physical drives found.");
        return Ok(());
    }

    let device = match name {
        Some(name) => match discovery.devices.iter().find(|d| d.name == name) {
            Some(device) => device.clone(),
            None => bail!("No external device named '{name}'. Run `diskex list` to see available devices."),
        },
        None => {
            print_devices(&discovery.devices);
            println!();
            match select_device(&discovery.devices)? {
                Some(device) => device,
                None => return Ok(()),
            }
        }
    };

    println!(
        "\nSelected: {} ({})",
        style(&device.name).cyan(),
        format_size(device.total_bytes)
    );
    println!(
        "{} All files on this disk must be closed before proceeding.",
        style("WARNING:").red().bold()
    );

    if !confirm_operation("Ready to proceed?")? {
        println!("Exercise cancelled.");
        return Ok(());
    }

    println!("Preparing to fully read disk {}...", device.name);

    let observer = CliObserver::new(&device);
    let bytes_read = ExerciseSession::new(device.clone(), Arc::new(SystemVolumes::new()))
        .with_options(options)
        .with_observer(observer)
        .run(interrupts)?;

    println!(
        "\n✨ Read complete: {} read from {} without errors.",
        format_size(bytes_read),
        style(device.path.display()).cyan()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(logging::LogConfig {
        json: cli.log_json,
        verbose: cli.verbose,
    });

    if !cli.no_elevate {
        elevate()?;
    }

    // This guard will be dropped when main() exits, restoring the terminal.
    let term_restorer = TermRestorer::new();

    // Ctrl+C and SIGTERM remount the device under exercise, then exit.
    let interrupts = Interrupts::install(term_restorer.exit_hook())?;

    match cli.command.unwrap_or_default() {
        Commands::List => list(),
        Commands::Exercise { device, options } => exercise(device, options, &interrupts),
    }
}
