//! Command-line surface and validation.
//!
//! Positional grammar:
//! `smrkit-bench <list|list-wf|tree> <seconds> <elements> <runs> <read%>
//! <insert%> <delete%> <HP|EBR|NR|IBR|HE|HYALINE> [threads]`
//!
//! Percentages accept a trailing `%`. Anything invalid exits with status 1.

use clap::{Arg, ArgMatches, Command};
use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataStructure {
    List,
    ListWf,
    Tree,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scheme {
    Hp,
    Ebr,
    Nr,
    Ibr,
    He,
    Hyaline,
}

impl Scheme {
    /// Epoch-framed schemes support the wait-free list wrapper.
    pub fn is_epoch_framed(self) -> bool {
        !matches!(self, Scheme::Hp | Scheme::He)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown data structure `{0}`; expected list, list-wf or tree")]
    BadDataStructure(String),
    #[error("unknown reclamation scheme `{0}`; expected HP, EBR, NR, IBR, HE or HYALINE")]
    BadScheme(String),
    #[error("`{0}` is not a valid number")]
    BadNumber(String),
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("percentages must be between 0 and 100, got {0}")]
    PercentRange(i64),
    #[error("read + insert + delete percentages must not exceed 100, got {0}")]
    PercentSum(i64),
    #[error("the wait-free list requires an epoch-framed scheme (NR, EBR, IBR or HYALINE)")]
    WfNeedsEpochScheme,
}

#[derive(Debug)]
pub struct Config {
    pub ds: DataStructure,
    pub seconds: u64,
    pub elements: usize,
    pub runs: usize,
    pub read_pct: u32,
    pub insert_pct: u32,
    pub delete_pct: u32,
    pub scheme: Scheme,
    pub threads: Option<usize>,
}

pub fn command() -> Command {
    Command::new("smrkit-bench")
        .about("Mixed-workload throughput and retained-memory benchmark for the smrkit containers")
        .arg(Arg::new("ds").required(true).value_name("list|list-wf|tree"))
        .arg(Arg::new("seconds").required(true).value_name("SECONDS"))
        .arg(Arg::new("elements").required(true).value_name("ELEMENTS"))
        .arg(Arg::new("runs").required(true).value_name("RUNS"))
        .arg(Arg::new("read").required(true).value_name("READ%"))
        .arg(Arg::new("insert").required(true).value_name("INSERT%"))
        .arg(Arg::new("delete").required(true).value_name("DELETE%"))
        .arg(
            Arg::new("scheme")
                .required(true)
                .value_name("HP|EBR|NR|IBR|HE|HYALINE"),
        )
        .arg(Arg::new("threads").required(false).value_name("THREADS"))
}

fn number(raw: &str) -> Result<i64, ConfigError> {
    raw.parse::<i64>()
        .map_err(|_| ConfigError::BadNumber(raw.to_string()))
}

fn percent(raw: &str) -> Result<i64, ConfigError> {
    let clean = raw.trim_end_matches('%');
    let value = number(clean)?;
    if !(0..=100).contains(&value) {
        return Err(ConfigError::PercentRange(value));
    }
    Ok(value)
}

pub fn parse(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let ds_raw = matches.get_one::<String>("ds").unwrap();
    let ds = match ds_raw.as_str() {
        "list" => DataStructure::List,
        "list-wf" => DataStructure::ListWf,
        "tree" => DataStructure::Tree,
        other => return Err(ConfigError::BadDataStructure(other.to_string())),
    };

    let seconds = number(matches.get_one::<String>("seconds").unwrap())?;
    if seconds <= 0 {
        return Err(ConfigError::NotPositive("test length"));
    }
    let elements = number(matches.get_one::<String>("elements").unwrap())?;
    if elements <= 0 {
        return Err(ConfigError::NotPositive("element count"));
    }
    let runs = number(matches.get_one::<String>("runs").unwrap())?;
    if runs <= 0 {
        return Err(ConfigError::NotPositive("run count"));
    }

    let read_pct = percent(matches.get_one::<String>("read").unwrap())?;
    let insert_pct = percent(matches.get_one::<String>("insert").unwrap())?;
    let delete_pct = percent(matches.get_one::<String>("delete").unwrap())?;
    let sum = read_pct + insert_pct + delete_pct;
    if sum > 100 {
        return Err(ConfigError::PercentSum(sum));
    }

    let scheme_raw = matches.get_one::<String>("scheme").unwrap();
    let scheme = match scheme_raw.as_str() {
        "HP" => Scheme::Hp,
        "EBR" => Scheme::Ebr,
        "NR" => Scheme::Nr,
        "IBR" => Scheme::Ibr,
        "HE" => Scheme::He,
        "HYALINE" => Scheme::Hyaline,
        other => return Err(ConfigError::BadScheme(other.to_string())),
    };

    if ds == DataStructure::ListWf && !scheme.is_epoch_framed() {
        return Err(ConfigError::WfNeedsEpochScheme);
    }

    let threads = match matches.get_one::<String>("threads") {
        Some(raw) => {
            let t = number(raw)?;
            if t <= 0 {
                return Err(ConfigError::NotPositive("thread count"));
            }
            Some(t as usize)
        }
        None => None,
    };

    Ok(Config {
        ds,
        seconds: seconds as u64,
        elements: elements as usize,
        runs: runs as usize,
        read_pct: read_pct as u32,
        insert_pct: insert_pct as u32,
        delete_pct: delete_pct as u32,
        scheme,
        threads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Result<Config, ConfigError> {
        let matches = command()
            .try_get_matches_from(std::iter::once("smrkit-bench").chain(args.iter().copied()))
            .expect("arity");
        parse(&matches)
    }

    #[test]
    fn accepts_percent_suffix() {
        let cfg = parse_args(&["list", "2", "512", "3", "80%", "10%", "10", "EBR"]).unwrap();
        assert_eq!(cfg.read_pct, 80);
        assert_eq!(cfg.insert_pct, 10);
        assert_eq!(cfg.delete_pct, 10);
        assert!(cfg.threads.is_none());
    }

    #[test]
    fn rejects_overfull_percentages() {
        let err = parse_args(&["list", "2", "512", "3", "80", "30", "10", "EBR"]).unwrap_err();
        assert!(matches!(err, ConfigError::PercentSum(120)));
    }

    #[test]
    fn rejects_wait_free_with_slot_scheme() {
        let err = parse_args(&["list-wf", "2", "512", "3", "80", "10", "10", "HP"]).unwrap_err();
        assert!(matches!(err, ConfigError::WfNeedsEpochScheme));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = parse_args(&["tree", "2", "512", "3", "80", "10", "10", "QSBR"]).unwrap_err();
        assert!(matches!(err, ConfigError::BadScheme(_)));
    }
}
