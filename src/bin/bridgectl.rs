use std::env;
use std::path::PathBuf;
use std::process;

use plugin_bridge::control::headless::HeadlessUi;
use plugin_bridge::control::ui::Console;
use plugin_bridge::control::{self, PluginUi};
use plugin_bridge::shutdown::install_signal_handler;
use plugin_bridge::tone::ToneGenerator;
use plugin_bridge::{Bridge, BridgeConfig, BridgeError, ClockHost, LogSink, init_tracing};

const USAGE: &str = "Usage: bridgectl [--config PATH] [--headless] [--print-config]

Runs the tone generator behind the bridge on a simulated clock host.

  --config PATH    merge PATH over the built-in configuration
                   (default: $PLUGIN_BRIDGE_CONFIG when set)
  --headless       log to stderr instead of opening the console
  --print-config   print the effective configuration and exit
  --help           show this message";

struct Options {
    config: Option<PathBuf>,
    headless: bool,
    print_config: bool,
}

fn parse_args() -> Options {
    let mut options = Options {
        config: None,
        headless: false,
        print_config: false,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => options.config = Some(PathBuf::from(path)),
                None => {
                    eprintln!("bridgectl: --config needs a path");
                    process::exit(1);
                }
            },
            "--headless" => options.headless = true,
            "--print-config" => options.print_config = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                process::exit(0);
            }
            other => {
                eprintln!("bridgectl: unknown argument '{other}'");
                process::exit(1);
            }
        }
    }
    options
}

fn run(options: Options) -> Result<(), BridgeError> {
    let config = BridgeConfig::load(options.config.as_deref())?;
    if options.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let headless = options.headless || !config.ui.enabled;
    let sink = if headless {
        LogSink::Stderr
    } else {
        LogSink::Buffer
    };
    init_tracing(config.logging.level()?, sink);

    let (mut bridge, mut bridge_ui) = Bridge::new(ToneGenerator::new(), &config)?;
    install_signal_handler(bridge.shutdown_token())?;
    bridge.activate(config.host.sample_rate, config.host.buffer_size)?;

    let host = ClockHost::start(bridge, config.clock_host(0, 2))?;

    let mut ui: Box<dyn PluginUi> = if headless {
        Box::new(HeadlessUi::new(config.idle_interval()))
    } else {
        Box::new(Console::new(config.idle_interval())?)
    };
    let result = control::exec(ui.as_mut(), &mut bridge_ui);
    drop(ui);

    let mut bridge = host.stop()?;
    bridge.deactivate()?;
    result
}

fn main() {
    let options = parse_args();
    if let Err(err) = run(options) {
        eprintln!("bridgectl: {err}");
        process::exit(1);
    }
}
