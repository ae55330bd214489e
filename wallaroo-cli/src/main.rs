use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use wallaroo_cli::{describe_event, WallarooCliApp};
use wallaroo_core::{AspectFilterMode, IntervalUnit, Resolution, SystemWallpaper};

#[derive(Parser, Debug)]
#[command(name = "wallaroo")]
#[command(about = "Wallaroo - rotates your desktop wallpaper through images from subreddits")]
#[command(version)]
struct Cli {
    /// Use this directory for config.json, sources.json and url_map.json
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Use this directory for cached images and index.json
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Do everything except changing the desktop and saving settings
    #[arg(long, global = true)]
    dry_run: bool,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download recent images from every enabled source, or just one
    Update {
        subreddit: Option<String>,
    },
    /// Set a random image that passes the filters
    Random {
        /// Prefer favorites
        #[arg(long)]
        favorite: bool,
    },
    /// Set a specific cached image
    Set { file: PathBuf },
    /// Toggle favorite on an image (default: the current wallpaper)
    Favorite { file: Option<PathBuf> },
    /// Never show an image again (default: the current wallpaper)
    Ban { file: Option<PathBuf> },
    /// Delete images whose subreddit is no longer a source
    Cleanup,
    /// Fill in missing metadata and thumbnails for cached images
    Reindex,
    /// List cached images, newest first
    List,
    /// Show what is known about an image (default: the current wallpaper)
    Info { file: Option<PathBuf> },
    /// Resolutions available under the current aspect filter
    Resolutions,
    /// Manage the subreddit list
    #[command(subcommand)]
    Sources(SourcesCommand),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Keep rotating the wallpaper on the configured interval
    Daemon,
    /// Interactive menu (the default)
    Menu,
    /// Print environment and cache diagnostics
    Diagnose,
}

#[derive(Subcommand, Debug)]
enum SourcesCommand {
    List,
    Add { name: String },
    Remove { name: String },
    Enable { name: String },
    Disable { name: String },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    /// Aspect filter: all, exact or rough
    Filter { mode: AspectFilterMode },
    FavoritesOnly {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Rotation interval, e.g. `15 minutes`; 0 or `on-restart` disables rotation
    Interval(IntervalArgs),
    /// Allowed resolutions such as 1920x1080; none clears the list
    Resolutions { resolutions: Vec<Resolution> },
    /// Target aspect ratio, e.g. 16:9 or 1.78
    Aspect { ratio: String },
}

#[derive(Args, Debug)]
struct IntervalArgs {
    value: u64,
    #[arg(default_value = "minutes")]
    unit: IntervalUnit,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose || cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn run(cli: Cli) -> Result<()> {
    let mut app = WallarooCliApp::new(cli.config_dir, cli.cache_dir, cli.dry_run)?;

    match cli.command.unwrap_or(Command::Menu) {
        Command::Update { subreddit } => {
            let report = app.update(subreddit.as_deref(), |event| println!("{}", describe_event(event)))?;
            println!(
                "Cached {} images from {} subreddits",
                report.total_cached(),
                report.refreshed.len()
            );
            if !report.failed.is_empty() {
                println!("Failed: {}", report.failed.join(", "));
            }
        }
        Command::Random { favorite } => {
            let chosen = if favorite {
                app.set_random_favorite()?
            } else {
                app.set_random()?
            };
            match chosen {
                Some(path) => println!("Set wallpaper: {}", path.display()),
                None => println!("No cached image matches the current filters. Try `wallaroo update`."),
            }
        }
        Command::Set { file } => {
            let path = app.set_specific(&file)?;
            println!("Set wallpaper: {}", path.display());
        }
        Command::Favorite { file } => {
            if app.toggle_favorite(file.as_deref())? {
                println!("Added to favorites");
            } else {
                println!("Removed from favorites");
            }
        }
        Command::Ban { file } => match app.ban(file.as_deref())? {
            Some(path) => println!("Banned. New wallpaper: {}", path.display()),
            None => println!("Banned"),
        },
        Command::Cleanup => {
            let report = app.cleanup()?;
            println!("Removed {} images, {} remain", report.removed.len(), report.kept);
        }
        Command::Reindex => {
            let count = app.reindex()?;
            println!("Indexed {} images", count);
        }
        Command::List => {
            let images = app.list()?;
            for image in &images {
                println!("{}", image.summary());
            }
            println!("{} images", images.len());
        }
        Command::Info { file } => print!("{}", app.details(file.as_deref())?),
        Command::Resolutions => {
            for (resolution, count) in app.resolutions() {
                println!("{:>10}  {}", resolution.to_string(), count);
            }
        }
        Command::Sources(command) => run_sources(&mut app, command)?,
        Command::Settings(command) => run_settings(&mut app, command)?,
        Command::Daemon => app.run_daemon()?,
        Command::Menu => app.run()?,
        Command::Diagnose => {
            for (name, value) in app.diagnose() {
                println!("{:<14} {}", name, value);
            }
            let reported = SystemWallpaper.current().unwrap_or_else(|| "(unknown)".to_string());
            println!("{:<14} {}", "desktop shows", reported);
        }
    }

    Ok(())
}

fn run_sources(app: &mut WallarooCliApp, command: SourcesCommand) -> Result<()> {
    match command {
        SourcesCommand::List => {
            let index = app.cache().index().read();
            for source in app.sources().iter() {
                let updated = source
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let state = if source.enabled { "on " } else { "off" };
                let cached = index.count_for_subreddit(&source.name);
                println!("{} r/{:<24} {:>4} images  updated {}", state, source.name, cached, updated);
            }
        }
        SourcesCommand::Add { name } => {
            if app.add_source(&name)? {
                println!("Added r/{}", name.trim_start_matches("r/"));
            } else {
                println!("Already listed");
            }
        }
        SourcesCommand::Remove { name } => {
            if app.remove_source(&name)? {
                println!("Removed. Run `wallaroo cleanup` to delete its images.");
            } else {
                println!("Not listed");
            }
        }
        SourcesCommand::Enable { name } => app.set_source_enabled(&name, true)?,
        SourcesCommand::Disable { name } => app.set_source_enabled(&name, false)?,
    }
    Ok(())
}

fn run_settings(app: &mut WallarooCliApp, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let settings = app.settings();
            let resolutions: Vec<String> = settings.resolutions.iter().map(|r| r.to_string()).collect();
            println!("filter          {}", settings.filter_mode);
            println!("favorites only  {}", settings.favorites_only);
            println!("interval        {} {}", settings.auto_interval, settings.auto_unit);
            println!("target aspect   {:.3}", settings.target_aspect);
            println!("per subreddit   {}", settings.per_subreddit_limit);
            if resolutions.is_empty() {
                println!("resolutions     any");
            } else {
                println!("resolutions     {}", resolutions.join(", "));
            }
        }
        SettingsCommand::Filter { mode } => app.set_filter_mode(mode)?,
        SettingsCommand::FavoritesOnly { enabled } => app.set_favorites_only(enabled)?,
        SettingsCommand::Interval(IntervalArgs { value, unit }) => app.set_interval(value, unit)?,
        SettingsCommand::Resolutions { resolutions } => app.set_resolutions(resolutions)?,
        SettingsCommand::Aspect { ratio } => app.set_target_aspect(wallaroo_core::parse_aspect(&ratio)?)?,
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
