use std::{collections::BTreeMap, process::exit, str::FromStr};

use colored::Colorize;
use log::{debug, LevelFilter};
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
};
use serde::Serialize;
use tokio::task::JoinSet;

use httpsim::{
    config::{self, Config, FlowConfig, DEFAULT_CONFIG_PATH},
    flow::Flow,
    utils::HttpSimError,
    values::{Value, ValueStore},
};

fn cli() -> clap::Command {
    clap::Command::new("httpsim")
        .about("Runs scripted multi-step HTTP flows")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            clap::Command::new("run")
                .about("Execute a flow definition")
                .alias("r")
                .arg(
                    clap::arg!(<FLOW> "Path to a YAML flow definition")
                        .required(true)
                )
                .arg(
                    clap::Arg::new("value")
                        .short('v')
                        .long("value")
                        .value_name("KEY=VALUE")
                        .action(clap::ArgAction::Append)
                        .help("Value given to every run, overrides the values file")
                )
                .arg(
                    clap::Arg::new("values-file")
                        .short('f')
                        .long("values-file")
                        .value_name("YAML")
                        .help("Mapping of values, or list of mappings to run the flow once per entry")
                )
                .arg(
                    clap::Arg::new("json")
                        .long("json")
                        .action(clap::ArgAction::SetTrue)
                        .help("Print resulting values as JSON instead of YAML")
                )
        )
        .subcommand(
            clap::Command::new("check")
                .about("Validate a flow definition and print its steps")
                .alias("c")
                .arg(
                    clap::arg!(<FLOW> "Path to a YAML flow definition")
                        .required(true)
                )
        )
        .arg(
            clap::arg!(-c --config <CONFIG> "Path to httpsim config")
                .default_value(DEFAULT_CONFIG_PATH)
        )
        .arg(
            clap::Arg::new("debug-file")
                .long("debug-file")
                .value_name("FILE-TO-WRITE")
                .help("A file to write debug messages to")
        )
        .arg(
            clap::Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Per request timeout in seconds, 0 disables it")
        )
}

fn init_logging(config: &Config) -> Result<(), HttpSimError> {
    let level = LevelFilter::from_str(&config.log_level).unwrap_or(LevelFilter::Info);
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {m}{n}")))
        .build();

    let mut builder = log4rs::Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)));
    let mut logger = Logger::builder().appender("console");

    if let Some(debug_file) = config.debug_file.as_ref() {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} {l} {t} - {m}{n}")))
            .build(debug_file)?;

        builder = builder.appender(Appender::builder().build("debug-file", Box::new(file)));
        logger = logger.appender("debug-file");
    }

    let level = if config.debug_file.is_some() { LevelFilter::Debug } else { level };
    let log_config = builder
        .logger(logger.additive(false).build("httpsim", level))
        .build(Root::builder().build(LevelFilter::Off))
        .map_err(|e| HttpSimError::Config(e.to_string()))?;

    log4rs::init_config(log_config)?;
    Ok(())
}

#[derive(Serialize)]
struct RunReport {
    run: usize,
    state: String,
    values: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>
}

impl RunReport {
    fn new(run: usize, flow: &Flow, result: Result<(), HttpSimError>) -> Self {
        RunReport {
            run,
            state: flow.state().to_string(),
            values: flow
                .values()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            error: result.err().map(|e| e.to_string())
        }
    }

    fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

fn value_sets(args: &clap::ArgMatches) -> Result<Vec<ValueStore>, HttpSimError> {
    let mut sets = match args.get_one::<String>("values-file") {
        Some(path) => config::load_value_sets(path)?,
        None => vec![ValueStore::default()]
    };

    if let Some(assignments) = args.get_many::<String>("value") {
        for assignment in assignments {
            let (key, value) = config::parse_assignment(assignment)?;
            for set in sets.iter_mut() {
                set.insert(key.clone(), Value::from(value.as_str()));
            }
        }
    }

    Ok(sets)
}

async fn run(args: &clap::ArgMatches, config: &Config) -> Result<bool, HttpSimError> {
    let Some(flow_path) = args.get_one::<String>("FLOW") else {
        return Err(HttpSimError::Config("flow path is required".to_string()));
    };

    let flow = FlowConfig::from_file(flow_path)?
        .into_flow()?
        .with_client_config(config.client_config());

    let sets = value_sets(args)?;
    debug!("httpsim - running '{}' for {} value sets", flow_path, sets.len());

    let mut tasks = JoinSet::new();
    for (run, values) in sets.into_iter().enumerate() {
        let mut copy = flow.complete_copy();
        tasks.spawn(async move {
            let result = copy.execute(values).await;
            RunReport::new(run, &copy, result)
        });
    }

    let mut reports: Vec<RunReport> = Vec::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(err) => return Err(HttpSimError::Config(format!("flow run panicked: {}", err)))
        }
    }
    reports.sort_by_key(|r| r.run);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    else {
        print!("{}", serde_yaml::to_string(&reports)?);
    }

    for report in reports.iter() {
        match report.error.as_ref() {
            None => eprintln!("run {}: {}", report.run, "OK".green().bold()),
            Some(err) => eprintln!("run {}: {} {}", report.run, "FAILED".red().bold(), err)
        }
    }

    Ok(reports.iter().all(|r| r.succeeded()))
}

fn check(args: &clap::ArgMatches) -> Result<(), HttpSimError> {
    let Some(flow_path) = args.get_one::<String>("FLOW") else {
        return Err(HttpSimError::Config("flow path is required".to_string()));
    };

    let flow = FlowConfig::from_file(flow_path)?.into_flow()?;
    println!("required: {}", flow.required_values.join(", "));
    for (index, step) in flow.steps.iter().enumerate() {
        println!(
            "{}. {} {} {}\n   in: [{}]\n   extractors: {}",
            index,
            step.name.bold(),
            step.request.method.as_str(),
            &step.request.url,
            step.keys_input.join(", "),
            step.keys_output.len()
        );
    }

    println!("{}", "OK".green().bold());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), HttpSimError> {
    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let mut config = Config::load_or_create(config_path)?;

    if let Some(debug_file) = matches.get_one::<String>("debug-file") {
        config.debug_file = Some(debug_file.clone());
    }

    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_secs = *timeout;
    }

    init_logging(&config)?;
    debug!("httpsim - request timeout {}s", config.timeout_secs);

    match matches.subcommand() {
        Some(("run", args)) => {
            if !run(args, &config).await? {
                exit(1);
            }
        },
        Some(("check", args)) => {
            check(args)?;
        },
        _ => {
            unreachable!()
        }
    }

    Ok(())
}
