// ==========================================
// CAMA 导入引擎 - 命令行入口
// ==========================================
// 用法:
//   cama-import initial <db_path|-> <job_id> <year> <ccdd> <source_file> [code_file]
//   cama-import update  <db_path|-> <job_id> <year> <ccdd> <source_file> [code_file]
//   cama-import decide  <db_path|-> <job_id> <year> <ccdd> <source_file> <key=decision>...
//   cama-import codes   <db_path|-> <job_id> <code_file> [BRT|MICROSYSTEMS]
// db_path 为 "-" 时使用默认路径（见 db::default_db_path）
// 输出: stdout 为 JSON；存在待决售价变更时打印对账报告并以 2 退出
// ==========================================

use anyhow::{anyhow, bail, Context};
use cama_import::config::ConfigManager;
use cama_import::db::default_db_path;
use cama_import::importer::file_parser::read_source_file;
use cama_import::importer::{ImportError, PropertyImporter, PropertyImporterImpl};
use cama_import::repository::SqlitePropertyGateway;
use cama_import::{logging, ImportContext, SaleDecision, VendorKind};
use std::path::Path;
use std::sync::Arc;

const EXIT_PENDING_DECISIONS: i32 = 2;

const USAGE: &str = "\
用法:
  cama-import initial <db_path|-> <job_id> <year> <ccdd> <source_file> [code_file]
  cama-import update  <db_path|-> <job_id> <year> <ccdd> <source_file> [code_file]
  cama-import decide  <db_path|-> <job_id> <year> <ccdd> <source_file> <key=decision>...
  cama-import codes   <db_path|-> <job_id> <code_file> [BRT|MICROSYSTEMS]";

type Importer = PropertyImporterImpl<ConfigManager>;

fn resolve_db_path(arg: &str) -> String {
    if arg == "-" {
        default_db_path()
    } else {
        arg.to_string()
    }
}

fn build_importer(db_path: &str) -> anyhow::Result<Importer> {
    let gateway = SqlitePropertyGateway::new(db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    let config = ConfigManager::new(db_path)?;
    Ok(PropertyImporterImpl::with_defaults(Arc::new(gateway), config))
}

fn read_text(path: &str) -> anyhow::Result<String> {
    let bytes = read_source_file(Path::new(path))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn parse_choice(arg: &str) -> anyhow::Result<(String, SaleDecision)> {
    let (key, decision) = arg
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("决策参数格式应为 key=decision: {}", arg))?;
    let decision: SaleDecision = decision.parse().map_err(|e: String| anyhow!(e))?;
    Ok((key.to_string(), decision))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 源文件类命令的公共参数: <db> <job_id> <year> <ccdd> <source_file>
struct SourceArgs {
    db_path: String,
    ctx: ImportContext,
    source_path: String,
    rest: Vec<String>,
}

fn source_args(args: &[String]) -> anyhow::Result<SourceArgs> {
    if args.len() < 5 {
        bail!("{}", USAGE);
    }
    let year: i32 = args[2]
        .trim()
        .parse()
        .with_context(|| format!("年份无效: {}", args[2]))?;
    Ok(SourceArgs {
        db_path: resolve_db_path(&args[0]),
        ctx: ImportContext::new(args[1].clone(), year, args[3].clone()),
        source_path: args[4].clone(),
        rest: args[5..].to_vec(),
    })
}

async fn load_code_file(importer: &Importer, job_id: &str, path: Option<&String>) -> anyhow::Result<()> {
    if let Some(path) = path {
        let content = read_text(path)?;
        importer.import_code_file(job_id, &content, None).await?;
    }
    Ok(())
}

async fn run(command: &str, args: &[String]) -> anyhow::Result<i32> {
    match command {
        "initial" | "update" => {
            let a = source_args(args)?;
            let importer = build_importer(&a.db_path)?;
            load_code_file(&importer, &a.ctx.job_id, a.rest.first()).await?;

            let bytes = read_source_file(Path::new(&a.source_path))?;
            let file_name = file_name_of(&a.source_path);

            if command == "initial" {
                let summary = importer.import_initial(&a.ctx, &file_name, &bytes).await?;
                print_json(&summary)?;
                return Ok(0);
            }

            match importer.import_update(&a.ctx, &file_name, &bytes).await {
                Ok(summary) => {
                    print_json(&summary)?;
                    Ok(0)
                }
                Err(ImportError::PendingSaleDecisions { count }) => {
                    tracing::warn!(count, "存在待决售价变更");
                    let plan = importer.prepare_update(&a.ctx, &file_name, &bytes).await?;
                    print_json(&plan)?;
                    Ok(EXIT_PENDING_DECISIONS)
                }
                Err(e) => Err(e.into()),
            }
        }
        "decide" => {
            let a = source_args(args)?;
            if a.rest.is_empty() {
                bail!("{}", USAGE);
            }
            let choices = a
                .rest
                .iter()
                .map(|s| parse_choice(s))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let importer = build_importer(&a.db_path)?;
            let bytes = read_source_file(Path::new(&a.source_path))?;
            let file_name = file_name_of(&a.source_path);

            let plan = importer.prepare_update(&a.ctx, &file_name, &bytes).await?;
            let recorded = importer
                .record_sale_decisions(&a.ctx, &plan, &choices, std::env::var("USER").ok().as_deref())
                .await?;
            print_json(&recorded)?;
            Ok(0)
        }
        "codes" => {
            if args.len() < 3 {
                bail!("{}", USAGE);
            }
            let db_path = resolve_db_path(&args[0]);
            let hint = match args.get(3) {
                Some(v) => Some(v.parse::<VendorKind>().map_err(|e| anyhow!(e))?),
                None => None,
            };
            let importer = build_importer(&db_path)?;
            let content = read_text(&args[2])?;
            let table = importer.import_code_file(&args[1], &content, hint).await?;
            print_json(&serde_json::json!({
                "job_id": args[1],
                "vendor": table.vendor,
                "definitions": table.definition_count(),
                "info_sources": table.info_sources.len(),
            }))?;
            Ok(0)
        }
        _ => bail!("{}", USAGE),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    tracing::info!(version = cama_import::VERSION, command = %command, "CAMA 导入引擎启动");

    let code = run(command, rest).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
