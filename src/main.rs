mod cli;

use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands};
use ledgerkv::{DataType, Engine, Options, Result};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,ledgerkv=info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let cli = Cli::parse();

    let mut opts = match &cli.config {
        Some(path) => Options::from_json_file(path)?,
        None => Options::default(),
    };
    if let Some(path) = cli.db_path {
        opts.db_path = path;
    }
    // One-shot process: compaction only runs when asked for.
    opts.log_file_gc_interval = Duration::ZERO;

    let engine = Engine::open(opts)?;
    let result = run(&engine, cli.command);
    engine.close()?;
    result
}

fn show(value: Option<Vec<u8>>) -> String {
    match value {
        Some(v) => format!("\"{}\"", String::from_utf8_lossy(&v)),
        None => "(nil)".to_string(),
    }
}

fn show_list(values: &[Vec<u8>]) {
    if values.is_empty() {
        println!("(empty)");
    }
    for (i, v) in values.iter().enumerate() {
        println!("{}) \"{}\"", i + 1, String::from_utf8_lossy(v));
    }
}

fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Set { key, value, ttl } => {
            match ttl {
                Some(secs) => engine.set_ex(key.as_bytes(), value.as_bytes(), Duration::from_secs(secs))?,
                None => engine.set(key.as_bytes(), value.as_bytes())?,
            }
            println!("OK");
        }
        Commands::Get { key } => println!("{}", show(engine.get(key.as_bytes())?)),
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Incr { key, by } => println!("{}", engine.incr_by(key.as_bytes(), by)?),
        Commands::Ttl { key } => println!("{}", engine.ttl(key.as_bytes())?),
        Commands::Keys { prefix } => {
            let keys: Vec<Vec<u8>> = engine
                .scan(prefix.as_bytes(), 0)?
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            show_list(&keys);
        }

        Commands::Lpush { key, values } => println!("{}", engine.lpush(key.as_bytes(), &values)?),
        Commands::Rpush { key, values } => println!("{}", engine.rpush(key.as_bytes(), &values)?),
        Commands::Lpop { key } => println!("{}", show(engine.lpop(key.as_bytes())?)),
        Commands::Rpop { key } => println!("{}", show(engine.rpop(key.as_bytes())?)),
        Commands::Lrange { key, start, end } => show_list(&engine.lrange(key.as_bytes(), start, end)?),

        Commands::Hset { key, pairs } => println!("{}", engine.hset(key.as_bytes(), &pairs)?),
        Commands::Hget { key, field } => println!("{}", show(engine.hget(key.as_bytes(), field.as_bytes())?)),
        Commands::Hdel { key, fields } => println!("{}", engine.hdel(key.as_bytes(), &fields)?),
        Commands::Hgetall { key } => {
            let flat: Vec<Vec<u8>> = engine
                .hgetall(key.as_bytes())?
                .into_iter()
                .flat_map(|(f, v)| [f, v])
                .collect();
            show_list(&flat);
        }

        Commands::Sadd { key, members } => println!("{}", engine.sadd(key.as_bytes(), &members)?),
        Commands::Srem { key, members } => println!("{}", engine.srem(key.as_bytes(), &members)?),
        Commands::Smembers { key } => show_list(&engine.smembers(key.as_bytes())?),

        Commands::Zadd { key, score, member } => {
            println!("{}", engine.zadd(key.as_bytes(), score, member.as_bytes())? as u8)
        }
        Commands::Zscore { key, member } => match engine.zscore(key.as_bytes(), member.as_bytes())? {
            Some(score) => println!("{}", score),
            None => println!("(nil)"),
        },
        Commands::Zrange {
            key,
            start,
            stop,
            with_scores,
        } => {
            let members = engine.zrange_with_scores(key.as_bytes(), start, stop)?;
            if members.is_empty() {
                println!("(empty)");
            }
            for (i, (member, score)) in members.iter().enumerate() {
                if with_scores {
                    println!("{}) \"{}\" {}", i + 1, String::from_utf8_lossy(member), score);
                } else {
                    println!("{}) \"{}\"", i + 1, String::from_utf8_lossy(member));
                }
            }
        }

        Commands::Compact { data_type, ratio } => {
            let ratio = ratio.unwrap_or(engine.options().log_file_gc_ratio);
            let types = match data_type {
                Some(name) => vec![name.parse::<DataType>()?],
                None => DataType::ALL.to_vec(),
            };
            for dt in types {
                let stats = engine.compact(dt, ratio)?;
                println!(
                    "{}: {} segments compacted, {} bytes reclaimed, {} entries rewritten, {} dropped",
                    dt, stats.segments_compacted, stats.bytes_reclaimed, stats.entries_rewritten, stats.entries_dropped
                );
            }
        }
        Commands::Stats => {
            for dt in DataType::ALL {
                println!("{:<5} segments: {:?}", dt, engine.segment_ids(dt));
            }
            println!();
            println!("{}", engine.metrics().summary());
        }
    }
    Ok(())
}
