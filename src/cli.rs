//! CLI definition and dispatch.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::broker_adapter::BrokerAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::http_quote_adapter::{DataSourceConfig, HttpQuoteAdapter};
use crate::adapters::sim_exchange::SimulatedExchange;
use crate::adapters::sqlite_store::SqliteStore;
use crate::adapters::xml_strategy_adapter;
use crate::domain::error::TraderError;
use crate::domain::ingest::{onboard_source, Ingester};
use crate::domain::job::{
    JobRecorder, TERMINATED_CANCELLED, TERMINATED_ERRORS, TERMINATED_SUCCESS,
    TERMINATED_WARNINGS,
};
use crate::domain::regression::RegressionDriver;
use crate::domain::registry::StrategyRegistry;
use crate::domain::settings::Settings;
use crate::domain::strategy::Strategy;
use crate::domain::strategy_executor::StrategyExecutor;
use crate::ports::config_port::ConfigPort;
use crate::ports::exchange_port::ExchangePort;
use crate::ports::store_port::StorePort;

#[derive(Parser, Debug)]
#[command(name = "autotrader", about = "Automated equity trading platform")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a strategy once and drive the resulting trades
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Strategy descriptor; defaults to the configured xml_file
        #[arg(short, long)]
        strategy: Option<PathBuf>,
        /// Propose trades without submitting them
        #[arg(long)]
        suppress_trades: bool,
    },
    /// Replay a strategy over a historical run calendar
    Regression {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: Option<PathBuf>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Comma-separated run times per day, HH:MM
        #[arg(long, default_value = "10:00")]
        times: String,
        /// Bread-crumb CSV export path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Keep the ephemeral database file
        #[arg(long)]
        keep_db: bool,
    },
    /// Capture quotes or intraday series into the tick store
    Ingest {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated symbols
        #[arg(long)]
        symbols: String,
        /// Data source name, resolved from [source.<name>] config
        #[arg(long)]
        source: String,
        /// Fetch the full intraday series instead of one quote
        #[arg(long)]
        intraday: bool,
    },
    /// Validate a strategy descriptor against the function registry
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run {
            config,
            strategy,
            suppress_trades,
        } => run_strategy(&config, strategy.as_deref(), suppress_trades),
        Command::Regression {
            config,
            strategy,
            start,
            end,
            times,
            output,
            keep_db,
        } => run_regression(
            &config,
            strategy.as_deref(),
            start,
            end,
            &times,
            output.as_deref(),
            keep_db,
        ),
        Command::Ingest {
            config,
            symbols,
            source,
            intraday,
        } => run_ingest(&config, &symbols, &source, intraday),
        Command::Validate { strategy } => run_validate(&strategy),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn fail(err: &TraderError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

fn load_config(path: &Path) -> Result<FileConfigAdapter, TraderError> {
    FileConfigAdapter::from_file(path).map_err(|e| TraderError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn open_store(
    config: &FileConfigAdapter,
    settings: &Settings,
) -> Result<SqliteStore, TraderError> {
    let store = if config.get_string("store", "path").is_some() {
        SqliteStore::from_config(config)?
    } else {
        SqliteStore::open(
            settings.db_root_path.join("trader.db"),
            SqliteStore::schemas_from_config(config),
        )?
    };
    store.initialize_schema()?;
    Ok(store)
}

fn descriptor_path(settings: &Settings, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| settings.configs_root_path.join(&settings.xml_file))
}

fn run_strategy(
    config_path: &Path,
    strategy_path: Option<&Path>,
    suppress_trades: bool,
) -> ExitCode {
    let result = (|| -> Result<ExitCode, TraderError> {
        let config = load_config(config_path)?;
        let settings = Settings::from_config(&config)?;
        init_tracing(settings.debug);

        let store = open_store(&config, &settings)?;
        let registry = StrategyRegistry::with_builtins();

        let path = descriptor_path(&settings, strategy_path);
        eprintln!("Loading strategy from {}", path.display());
        let mut definition = xml_strategy_adapter::parse_file(&path)?;
        if suppress_trades {
            definition.options.suppress_trades = true;
        }
        // Unknown function names fail here, before any data is touched.
        registry.get(&definition.function)?;

        let run_datetime = definition
            .run_datetime
            .unwrap_or_else(|| settings.now_local());
        let strategy = Strategy::new(definition, run_datetime, &store);

        if store
            .query_one("strategies", &[("name", &strategy.definition.name)])?
            .is_none()
        {
            info!(strategy = %strategy.definition.name, "first run, on-boarding");
            strategy.onboard(&settings.job_name)?;
        }
        let mut portfolio = strategy.load_portfolio()?;

        let exchange: Box<dyn ExchangePort + '_> =
            if config.get_string("broker", "base_url").is_some() {
                Box::new(BrokerAdapter::from_config(&config, settings.http_timeout)?)
            } else {
                Box::new(SimulatedExchange::with_store(
                    portfolio.cash,
                    &store,
                    run_datetime,
                ))
            };

        // Optional live data source exposed to the strategy context.
        let quotes = match config.get_string("platform", "data_source") {
            Some(name) => Some(HttpQuoteAdapter::new(
                DataSourceConfig::from_config(&config, &name)?,
                settings.timezone,
                settings.http_timeout,
                config.get_bool("platform", "cache_responses", true),
            )?),
            None => None,
        };

        let log_path = settings
            .logs_root_path
            .join(format!("{}.log", settings.job_name));
        let job = JobRecorder::start(
            &store,
            &settings.job_name,
            "autotrader run",
            env!("CARGO_PKG_VERSION"),
            &log_path.display().to_string(),
            run_datetime,
        )?;

        let mut executor = StrategyExecutor::new(&strategy, &store, exchange.as_ref(), &registry)
            .with_job(&job);
        if let Some(quotes) = &quotes {
            executor = executor.with_quotes(quotes);
        }

        match executor.run(&mut portfolio) {
            Ok(outcome) => {
                eprintln!(
                    "run complete: {} signals, {} trades proposed, {} filled, valuation {:.2}",
                    outcome.signals,
                    outcome.trades_proposed,
                    outcome.trades_filled,
                    outcome.valuation
                );
                let (phase, code) = if outcome.cancelled {
                    (TERMINATED_CANCELLED, ExitCode::from(1))
                } else if outcome.warnings > 0 || outcome.strategy_errors > 0 {
                    (TERMINATED_WARNINGS, ExitCode::from(2))
                } else {
                    (TERMINATED_SUCCESS, ExitCode::SUCCESS)
                };
                job.finish(run_datetime, phase)?;
                Ok(code)
            }
            Err(err) => {
                job.finish(run_datetime, TERMINATED_ERRORS)?;
                Err(err)
            }
        }
    })();

    match result {
        Ok(code) => code,
        Err(err) => fail(&err),
    }
}

fn parse_times(raw: &str) -> Result<Vec<NaiveTime>, TraderError> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            NaiveTime::parse_from_str(t, "%H:%M").map_err(|e| TraderError::ConfigInvalid {
                section: "regression".into(),
                key: "times".into(),
                reason: format!("{t}: {e}"),
            })
        })
        .collect()
}

fn build_calendar(start: NaiveDate, end: NaiveDate, times: &[NaiveTime]) -> Vec<NaiveDateTime> {
    let mut calendar = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            for time in times {
                calendar.push(day.and_time(*time));
            }
        }
        let Some(next) = day.succ_opt() else {
            break;
        };
        day = next;
    }
    calendar
}

fn run_regression(
    config_path: &Path,
    strategy_path: Option<&Path>,
    start: NaiveDate,
    end: NaiveDate,
    times: &str,
    output: Option<&Path>,
    keep_db: bool,
) -> ExitCode {
    let result = (|| -> Result<ExitCode, TraderError> {
        let config = load_config(config_path)?;
        let settings = Settings::from_config(&config)?;
        init_tracing(settings.debug);

        let path = descriptor_path(&settings, strategy_path);
        eprintln!("Loading strategy from {}", path.display());
        let definition = xml_strategy_adapter::parse_file(&path)?;
        let registry = StrategyRegistry::with_builtins();
        registry.get(&definition.function)?;

        let times = parse_times(times)?;
        let calendar = build_calendar(start, end, &times);
        eprintln!("Replaying {} run times", calendar.len());

        let driver = RegressionDriver::new(definition.clone(), calendar, &settings.db_root_path);

        // Carry cached history for the required symbols into the ephemeral
        // store, when the main store has any.
        if let Ok(main_store) = open_store(&config, &settings) {
            let mut ticks = Vec::new();
            for requirement in &definition.data_requirements {
                let rows = main_store
                    .query("ticks", &[("symbol", &requirement.symbol)], None)?
                    .unwrap_or_default();
                for row in rows {
                    if let (Some(ts), Some(value)) = (row.get("date_time"), row.get("value")) {
                        if let (Ok(date_time), Ok(value)) =
                            (crate::domain::tick::parse_wire(ts), value.parse())
                        {
                            ticks.push(crate::domain::tick::Tick {
                                date_time,
                                symbol: requirement.symbol.clone(),
                                value,
                                volume: 0,
                            });
                        }
                    }
                }
            }
            if !ticks.is_empty() {
                driver.seed_ticks(&ticks)?;
            }
        }

        let run_result = driver.run(&registry);
        let export_result = match (&run_result, output) {
            (Ok(result), Some(path)) => driver.export_csv(result, path),
            _ => Ok(()),
        };
        if !keep_db {
            driver.clean_up()?;
        }
        let result = run_result?;
        export_result?;

        let report = &result.report;
        eprintln!(
            "regression complete: {} run days, signal ratio {:.2}, trade ratio {:.2}, pnl {:.2}",
            report.run_days, report.signal_ratio, report.trade_ratio, report.pnl
        );
        if report.data_warning_count > 0 || report.strategy_error_count > 0 {
            eprintln!(
                "{} data warnings, {} strategy errors",
                report.data_warning_count, report.strategy_error_count
            );
            return Ok(ExitCode::from(2));
        }
        Ok(ExitCode::SUCCESS)
    })();

    match result {
        Ok(code) => code,
        Err(err) => fail(&err),
    }
}

fn run_ingest(config_path: &Path, symbols: &str, source_name: &str, intraday: bool) -> ExitCode {
    let result = (|| -> Result<ExitCode, TraderError> {
        let config = load_config(config_path)?;
        let settings = Settings::from_config(&config)?;
        init_tracing(settings.debug);

        let store = open_store(&config, &settings)?;
        let source_config = DataSourceConfig::from_config(&config, source_name)?;
        onboard_source(&store, source_name, &source_config.to_json())?;

        let caching = config.get_bool("platform", "cache_responses", true);
        let source = HttpQuoteAdapter::new(
            source_config,
            settings.timezone,
            settings.http_timeout,
            caching,
        )?;

        let symbols: Vec<String> = symbols
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let ingester = Ingester::new(&store, &source, settings.now_local());
        let summary = if intraday {
            ingester.capture_intraday(&symbols)
        } else {
            ingester.capture_quotes(&symbols)
        };

        eprintln!(
            "ingest complete: {} ticks written, {} symbols skipped, {} failed",
            summary.ticks_written, summary.symbols_skipped, summary.symbols_failed
        );
        if summary.symbols_failed > 0 || summary.symbols_skipped > 0 {
            return Ok(ExitCode::from(2));
        }
        Ok(ExitCode::SUCCESS)
    })();

    match result {
        Ok(code) => code,
        Err(err) => fail(&err),
    }
}

fn run_validate(strategy_path: &Path) -> ExitCode {
    match xml_strategy_adapter::parse_file(strategy_path) {
        Ok(definition) => {
            let registry = StrategyRegistry::with_builtins();
            if let Err(err) = registry.get(&definition.function) {
                return fail(&err);
            }
            eprintln!(
                "{} is valid: function {}, {} data requirements, {} risk checks",
                definition.name,
                definition.function,
                definition.data_requirements.len(),
                definition.risk_profile.checks.len()
            );
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err),
    }
}
