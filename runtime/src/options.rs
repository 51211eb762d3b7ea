use crate::plugin::PluginMeta;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use serde::Deserialize;
use snap_plugin_error::{PluginError, Result};
use snap_plugin_types::{Config, ConfigValue};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options file read when `--options-file` is not given; skipped if absent.
pub const DEFAULT_OPTIONS_FILE: &str = "options.yaml";

pub const DEFAULT_LOG_LEVEL: u8 = 2;
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_PING_MISS_LIMIT: u32 = 3;
pub const DEFAULT_STAND_ALONE_PORT: u16 = 8181;

/// Value type of a [`CustomFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Bool,
    Int,
    String,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagKind::Bool => f.write_str("bool"),
            FlagKind::Int => f.write_str("int"),
            FlagKind::String => f.write_str("string"),
        }
    }
}

/// A plugin specific option, accepted as `--<name>` and as a top-level key of
/// the options file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFlag {
    name: String,
    help: String,
    kind: FlagKind,
}

impl CustomFlag {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: FlagKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
        }
    }

    pub fn bool(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, FlagKind::Bool)
    }

    pub fn int(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, FlagKind::Int)
    }

    pub fn string(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, FlagKind::String)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FlagKind {
        self.kind
    }

    fn arg(&self) -> Arg {
        let arg = Arg::new(self.name.clone())
            .long(self.name.clone())
            .help(self.help.clone());

        match self.kind {
            FlagKind::Bool => arg.action(ArgAction::SetTrue),
            FlagKind::Int => arg.value_parser(clap::value_parser!(i64)),
            FlagKind::String => arg.value_parser(clap::value_parser!(String)),
        }
    }

    /// The value given on the command line, if any.
    fn value_from_matches(&self, matches: &ArgMatches) -> Option<ConfigValue> {
        if matches.value_source(&self.name) != Some(ValueSource::CommandLine) {
            return None;
        }

        match self.kind {
            FlagKind::Bool => Some(ConfigValue::Bool(matches.get_flag(&self.name))),
            FlagKind::Int => matches.get_one::<i64>(&self.name).copied().map(ConfigValue::Int),
            FlagKind::String => matches
                .get_one::<String>(&self.name)
                .cloned()
                .map(ConfigValue::String),
        }
    }

    fn value_from_yaml(&self, value: &serde_yaml::Value) -> std::result::Result<ConfigValue, String> {
        let converted = match self.kind {
            FlagKind::Bool => value.as_bool().map(ConfigValue::Bool),
            FlagKind::Int => value.as_i64().map(ConfigValue::Int),
            FlagKind::String => value.as_str().map(ConfigValue::from),
        };
        converted
            .ok_or_else(|| format!("option {}: expected a value of kind {}", self.name, self.kind))
    }
}

/// Command line parser for the built-in options plus the plugin's `flags`.
///
/// `-v`/`--version` prints the plugin name and version.
pub fn plugin_command(meta: &PluginMeta, flags: &[CustomFlag]) -> Result<Command> {
    let mut command = PluginArgs::command()
        .name(meta.name.clone())
        .version(meta.version.to_string())
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .action(ArgAction::Version)
                .help("Print the version"),
        );

    // flags are registered under their name as both id and long
    let mut taken: Vec<String> = command
        .get_arguments()
        .flat_map(|arg| [Some(arg.get_id().as_str()), arg.get_long()])
        .flatten()
        .map(str::to_string)
        .collect();
    taken.push("help".to_string());

    let mut problems = Vec::new();
    for flag in flags {
        if flag.name.is_empty() || flag.name.starts_with('-') {
            problems.push(format!("invalid flag name {:?}", flag.name));
        } else if taken.contains(&flag.name) {
            problems.push(format!("flag --{} is already defined", flag.name));
        } else {
            taken.push(flag.name.clone());
            command = command.arg(flag.arg());
        }
    }

    if !problems.is_empty() {
        return Err(PluginError::Options(problems.join("; ")));
    }
    Ok(command)
}

#[derive(Debug, Default, Parser)]
#[command(about = "Snap telemetry plugin")]
pub struct PluginArgs {
    /// Port to listen on (0 picks an ephemeral port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to listen on
    #[arg(long)]
    pub listen_address: Option<IpAddr>,

    /// Serve over TLS
    #[arg(long)]
    pub tls: bool,

    /// TLS certificate (PEM)
    #[arg(long)]
    pub cert_path: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    pub key_path: Option<PathBuf>,

    /// ':'-separated CA certificates used to authenticate clients
    #[arg(long, value_delimiter = ':')]
    pub root_cert_paths: Vec<PathBuf>,

    /// 0:Panic 1:Fatal 2:Error 3:Warn 4:Info 5:Debug
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=5))]
    pub log_level: Option<u8>,

    /// Time allowed between pings, e.g. "1500ms"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ping_timeout: Option<Duration>,

    /// Consecutive missed pings before the plugin exits
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub ping_miss_limit: Option<u32>,

    /// Run without a host: collectors print one collection, then every plugin
    /// serves on the stand-alone port without heartbeat supervision
    #[arg(long)]
    pub stand_alone: bool,

    /// Port served in stand-alone mode
    #[arg(long)]
    pub stand_alone_port: Option<u16>,

    /// Plugin config as a JSON object
    #[arg(long)]
    pub config: Option<String>,

    /// YAML file with default values for these options
    #[arg(long)]
    pub options_file: Option<PathBuf>,

    /// Values of the plugin's custom flags given on the command line
    #[arg(skip)]
    pub flags: Config,
}

/// Options read from the YAML options file. Every field is optional.
///
/// Keys that are not built-in options are kept in `flags` and must name a
/// custom flag of the plugin.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OptionsFile {
    pub port: Option<u16>,
    pub listen_address: Option<IpAddr>,
    pub tls: Option<bool>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub root_cert_paths: Option<Vec<PathBuf>>,
    pub log_level: Option<u8>,
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Option<Duration>,
    pub ping_miss_limit: Option<u32>,
    pub stand_alone: Option<bool>,
    pub stand_alone_port: Option<u16>,
    pub config: Option<serde_json::Value>,
    #[serde(flatten)]
    pub flags: BTreeMap<String, serde_yaml::Value>,
}

impl OptionsFile {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| PluginError::Options(format!("{}: {e}", path.display())))
    }

    /// Loads `path`, or the default options file if it exists.
    fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None => {
                let path = Path::new(DEFAULT_OPTIONS_FILE);
                if path.exists() {
                    Self::from_yaml_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub root_cert_paths: Vec<PathBuf>,
}

/// Startup parameters of a plugin process.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginOptions {
    pub listen_address: IpAddr,
    pub port: u16,
    pub tls: Option<TlsOptions>,
    pub log_level: u8,
    pub ping_timeout: Duration,
    pub ping_miss_limit: u32,
    pub stand_alone: bool,
    pub stand_alone_port: u16,
    pub config: Config,
    /// Custom flag values, command line over options file.
    pub flags: Config,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            tls: None,
            log_level: DEFAULT_LOG_LEVEL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            ping_miss_limit: DEFAULT_PING_MISS_LIMIT,
            stand_alone: false,
            stand_alone_port: DEFAULT_STAND_ALONE_PORT,
            config: Config::new(),
            flags: Config::new(),
        }
    }
}

impl PluginOptions {
    /// Reads options from arguments parsed by [`plugin_command`].
    pub fn from_matches(matches: &ArgMatches, flags: &[CustomFlag]) -> Result<Self> {
        let mut args =
            PluginArgs::from_arg_matches(matches).map_err(|e| PluginError::Options(e.to_string()))?;
        for flag in flags {
            if let Some(value) = flag.value_from_matches(matches) {
                args.flags.set(flag.name.clone(), value);
            }
        }
        Self::from_args(args, flags)
    }

    pub fn from_args(args: PluginArgs, flags: &[CustomFlag]) -> Result<Self> {
        let file = OptionsFile::load(args.options_file.as_deref())?;
        Self::merge(args, file, flags)
    }

    /// Command-line values win over file values, which win over defaults.
    ///
    /// All problems found are reported together.
    pub fn merge(args: PluginArgs, file: OptionsFile, flags: &[CustomFlag]) -> Result<Self> {
        let defaults = Self::default();
        let mut problems = Vec::new();

        let log_level = args
            .log_level
            .or(file.log_level)
            .unwrap_or(defaults.log_level);
        if log_level > 5 {
            problems.push(format!("log level {log_level} is outside 0..=5"));
        }

        let ping_timeout = args
            .ping_timeout
            .or(file.ping_timeout)
            .unwrap_or(defaults.ping_timeout);
        if ping_timeout.is_zero() {
            problems.push("ping timeout must be greater than zero".to_string());
        }

        let ping_miss_limit = args
            .ping_miss_limit
            .or(file.ping_miss_limit)
            .unwrap_or(defaults.ping_miss_limit);
        if ping_miss_limit == 0 {
            problems.push("ping miss limit must be at least 1".to_string());
        }

        let tls = if args.tls || file.tls.unwrap_or(false) {
            let cert_path = args.cert_path.or(file.cert_path);
            let key_path = args.key_path.or(file.key_path);
            let root_cert_paths = if args.root_cert_paths.is_empty() {
                file.root_cert_paths.unwrap_or_default()
            } else {
                args.root_cert_paths
            };

            match (cert_path, key_path) {
                (Some(cert_path), Some(key_path)) => Some(TlsOptions {
                    cert_path,
                    key_path,
                    root_cert_paths,
                }),
                (cert_path, key_path) => {
                    if cert_path.is_none() {
                        problems.push("TLS requires a certificate path".to_string());
                    }
                    if key_path.is_none() {
                        problems.push("TLS requires a key path".to_string());
                    }
                    None
                }
            }
        } else {
            None
        };

        let config = match (args.config, file.config) {
            (Some(json), _) => serde_json::from_str(&json)
                .map_err(|e| format!("config is not valid JSON: {e}"))
                .and_then(config_from_json),
            (None, Some(value)) => config_from_json(value),
            (None, None) => Ok(Config::new()),
        };
        let config = config.unwrap_or_else(|problem| {
            problems.push(problem);
            Config::new()
        });

        let mut flag_values = Config::new();
        for (key, value) in &file.flags {
            match flags.iter().find(|flag| flag.name == *key) {
                Some(flag) => match flag.value_from_yaml(value) {
                    Ok(value) => {
                        flag_values.set(key.clone(), value);
                    }
                    Err(problem) => problems.push(problem),
                },
                None => problems.push(format!("unknown option {key}")),
            }
        }
        flag_values.merge(&args.flags);

        if !problems.is_empty() {
            return Err(PluginError::Options(problems.join("; ")));
        }

        Ok(Self {
            listen_address: args
                .listen_address
                .or(file.listen_address)
                .unwrap_or(defaults.listen_address),
            port: args.port.or(file.port).unwrap_or(defaults.port),
            tls,
            log_level,
            ping_timeout,
            ping_miss_limit,
            stand_alone: args.stand_alone || file.stand_alone.unwrap_or(false),
            stand_alone_port: args
                .stand_alone_port
                .or(file.stand_alone_port)
                .unwrap_or(defaults.stand_alone_port),
            config,
            flags: flag_values,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }

    pub fn stand_alone_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.stand_alone_port)
    }
}

/// Converts a JSON object of scalar values into a [`Config`].
fn config_from_json(value: serde_json::Value) -> std::result::Result<Config, String> {
    let serde_json::Value::Object(map) = value else {
        return Err("config must be a JSON object".to_string());
    };

    let mut config = Config::new();
    for (key, value) in map {
        let value = match value {
            serde_json::Value::String(s) => ConfigValue::String(s),
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => ConfigValue::Int(i),
                (None, Some(f)) => ConfigValue::Float(f),
                (None, None) => return Err(format!("config key {key}: unsupported number {n}")),
            },
            other => {
                return Err(format!(
                    "config key {key}: expected a string, number or boolean, got {other}"
                ));
            }
        };
        config.set(key, value);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(argv: &[&str]) -> PluginArgs {
        PluginArgs::try_parse_from(std::iter::once("plugin").chain(argv.iter().copied())).unwrap()
    }

    fn yaml(content: &str) -> OptionsFile {
        serde_yaml::from_str(content).unwrap()
    }

    #[test]
    fn test_defaults() {
        let options = PluginOptions::merge(args(&[]), OptionsFile::default(), &[]).unwrap();
        assert_eq!(options, PluginOptions::default());
        assert_eq!(options.listen_addr().to_string(), "127.0.0.1:0");
        assert_eq!(options.ping_timeout, Duration::from_millis(1500));
        assert_eq!(options.ping_miss_limit, 3);
        assert_eq!(options.log_level, 2);
    }

    #[test]
    fn test_command_line() {
        let options = PluginOptions::merge(
            args(&[
                "--port",
                "8182",
                "--listen-address",
                "0.0.0.0",
                "--log-level",
                "5",
                "--ping-timeout",
                "2s 500ms",
                "--ping-miss-limit",
                "5",
                "--stand-alone",
                "--config",
                r#"{"user": "root", "port": 22, "ratio": 0.5, "debug": true}"#,
            ]),
            OptionsFile::default(),
            &[],
        )
        .unwrap();

        assert_eq!(options.listen_addr().to_string(), "0.0.0.0:8182");
        assert_eq!(options.log_level, 5);
        assert_eq!(options.ping_timeout, Duration::from_millis(2500));
        assert_eq!(options.ping_miss_limit, 5);
        assert!(options.stand_alone);
        assert_eq!(options.config.get_string("user").unwrap(), "root");
        assert_eq!(options.config.get_int("port").unwrap(), 22);
        assert_eq!(options.config.get_float("ratio").unwrap(), 0.5);
        assert!(options.config.get_bool("debug").unwrap());
    }

    #[test]
    fn test_rejected_arguments() {
        let parse = |argv: &[&str]| {
            PluginArgs::try_parse_from(std::iter::once("plugin").chain(argv.iter().copied()))
        };
        assert!(parse(&["--log-level", "6"]).is_err());
        assert!(parse(&["--ping-miss-limit", "0"]).is_err());
        assert!(parse(&["--ping-timeout", "soon"]).is_err());
    }

    #[test]
    fn test_command_line_wins_over_file() {
        let file = yaml(
            r#"
port: 9000
log-level: 4
ping-timeout: 3s
config:
  user: admin
"#,
        );

        let options = PluginOptions::merge(args(&["--port", "9100"]), file, &[]).unwrap();
        assert_eq!(options.port, 9100);
        assert_eq!(options.log_level, 4);
        assert_eq!(options.ping_timeout, Duration::from_secs(3));
        assert_eq!(options.config.get_string("user").unwrap(), "admin");
    }

    #[test]
    fn test_tls_options() {
        let options = PluginOptions::merge(
            args(&[
                "--tls",
                "--cert-path",
                "/etc/snap/plugin.crt",
                "--key-path",
                "/etc/snap/plugin.key",
                "--root-cert-paths",
                "/etc/snap/ca1.crt:/etc/snap/ca2.crt",
            ]),
            OptionsFile::default(),
            &[],
        )
        .unwrap();

        let tls = options.tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("/etc/snap/plugin.crt"));
        assert_eq!(tls.key_path, PathBuf::from("/etc/snap/plugin.key"));
        assert_eq!(
            tls.root_cert_paths,
            vec![
                PathBuf::from("/etc/snap/ca1.crt"),
                PathBuf::from("/etc/snap/ca2.crt")
            ]
        );
    }

    #[test]
    fn test_problems_are_reported_together() {
        let file = yaml("ping-miss-limit: 0\n");
        let err = PluginOptions::merge(args(&["--tls", "--config", "[1, 2]"]), file, &[]).unwrap_err();

        assert!(matches!(err, PluginError::Options(_)));
        let message = err.to_string();
        assert!(message.contains("miss limit"));
        assert!(message.contains("certificate path"));
        assert!(message.contains("key path"));
        assert!(message.contains("JSON object"));
    }

    #[test]
    fn test_unsupported_config_values() {
        let err = PluginOptions::merge(
            args(&["--config", r#"{"nested": {"a": 1}}"#]),
            OptionsFile::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, PluginError::Options(_)));
    }

    fn options_file_args(path: PathBuf) -> PluginArgs {
        PluginArgs {
            options_file: Some(path),
            ..Default::default()
        }
    }

    #[test]
    fn test_options_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "stand-alone: true\nping-miss-limit: 7\nstand-alone-port: 9191").unwrap();

        let options = PluginOptions::from_args(options_file_args(path), &[]).unwrap();
        assert!(options.stand_alone);
        assert_eq!(options.ping_miss_limit, 7);
        assert_eq!(options.stand_alone_addr().to_string(), "127.0.0.1:9191");

        let missing =
            PluginOptions::from_args(options_file_args(dir.path().join("missing.yaml")), &[]);
        assert!(matches!(missing, Err(PluginError::Io(_))));

        let unknown = dir.path().join("unknown.yaml");
        fs::write(&unknown, "colour: blue\n").unwrap();
        let err = PluginOptions::from_args(options_file_args(unknown), &[]).unwrap_err();
        assert!(matches!(err, PluginError::Options(_)));
        assert!(err.to_string().contains("unknown option colour"));
    }

    fn meta() -> PluginMeta {
        PluginMeta::new("rando", 7, crate::plugin::PluginType::Collector)
    }

    fn rando_flags() -> Vec<CustomFlag> {
        vec![
            CustomFlag::bool("verbose-metrics", "Describe every metric"),
            CustomFlag::int("depth", "Namespace depth"),
            CustomFlag::string("label", "Label added to every metric"),
        ]
    }

    #[test]
    fn test_version_flag() {
        for flag in ["--version", "-v"] {
            let err = plugin_command(&meta(), &[])
                .unwrap()
                .try_get_matches_from(["rando", flag])
                .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
            assert_eq!(err.exit_code(), 0);
            assert_eq!(err.to_string().trim(), "rando 7");
        }
    }

    #[test]
    fn test_stand_alone_port() {
        let options = PluginOptions::merge(args(&[]), OptionsFile::default(), &[]).unwrap();
        assert_eq!(options.stand_alone_port, DEFAULT_STAND_ALONE_PORT);

        let options = PluginOptions::merge(
            args(&["--stand-alone", "--stand-alone-port", "8282"]),
            yaml("stand-alone-port: 9191\n"),
            &[],
        )
        .unwrap();
        assert!(options.stand_alone);
        assert_eq!(options.stand_alone_addr().to_string(), "127.0.0.1:8282");
    }

    #[test]
    fn test_custom_flags() {
        let flags = rando_flags();
        let matches = plugin_command(&meta(), &flags)
            .unwrap()
            .try_get_matches_from(["rando", "--port", "8182", "--verbose-metrics", "--depth", "3"])
            .unwrap();

        let mut args = PluginArgs::from_arg_matches(&matches).unwrap();
        for flag in &flags {
            if let Some(value) = flag.value_from_matches(&matches) {
                args.flags.set(flag.name().to_string(), value);
            }
        }
        assert_eq!(args.port, Some(8182));
        assert!(!args.flags.contains_key("label"));

        let file = yaml("depth: 5\nlabel: lab\n");
        let options = PluginOptions::merge(args, file, &flags).unwrap();
        assert!(options.flags.get_bool("verbose-metrics").unwrap());
        // command line wins over the options file
        assert_eq!(options.flags.get_int("depth").unwrap(), 3);
        assert_eq!(options.flags.get_string("label").unwrap(), "lab");
        assert!(options.config.is_empty());

        let rejected = plugin_command(&meta(), &flags)
            .unwrap()
            .try_get_matches_from(["rando", "--depth", "deep"]);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_custom_flag_problems() {
        let err = PluginOptions::merge(args(&[]), yaml("depth: deep\n"), &rando_flags()).unwrap_err();
        assert!(err.to_string().contains("expected a value of kind int"));

        let clashing = [CustomFlag::int("port", "Shadows --port"), CustomFlag::bool("", "")];
        let err = plugin_command(&meta(), &clashing).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("--port is already defined"));
        assert!(message.contains("invalid flag name"));

        for name in ["version", "listen_address"] {
            let err = plugin_command(&meta(), &[CustomFlag::bool(name, "")]).unwrap_err();
            assert!(matches!(err, PluginError::Options(_)));
        }
    }
}
