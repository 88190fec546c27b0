//! 投递资格评估命令行
//!
//! 从文件（第一个参数）或标准输入读取 JSON 场景，输出评估结果 JSON：
//!
//! ```json
//! {
//!   "client": {"id": 1, "exclusive": "...", "duplicate": "...", "limits": "..."},
//!   "contact": {"id": 10, "email": "a@example.com"},
//!   "history": [],
//!   "send_date": "2024-06-01T12:00:00Z",
//!   "admit": false,
//!   "filter": {"condition": "AND", "rules": []},
//!   "filter_context": {"age": 30}
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use delivery_cache::{
    CacheEntry, ClientRuleConfig, Contact, Eligibility, EligibilityError, MemoryCacheStore,
};
use filter_engine::{FilterContext, FilterHelper};
use gate_shared::{config::AppConfig, observability};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// 评估场景
#[derive(Debug, Deserialize)]
struct Scenario {
    client: ClientRuleConfig,
    contact: Contact,
    #[serde(default)]
    history: Vec<CacheEntry>,
    #[serde(default)]
    send_date: Option<DateTime<Utc>>,
    /// 为 true 时检查通过后写入缓存条目
    #[serde(default)]
    admit: bool,
    /// 可选的过滤表达式（字符串或对象）
    #[serde(default)]
    filter: Option<Value>,
    /// 过滤上下文，缺省使用联系人本身
    #[serde(default)]
    filter_context: Option<Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("cache-eval").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let guard = observability::init(&obs_config)?;

    let scenario = read_scenario()?;
    info!(
        environment = %config.environment,
        client_id = scenario.client.id,
        contact_id = scenario.contact.id,
        history = scenario.history.len(),
        "场景已加载"
    );

    let decision = evaluate(scenario, &config).await?;
    write_decision(&mut std::io::stdout().lock(), &decision)?;

    if let Some(snapshot) = guard.render_metrics() {
        debug!(metrics = %snapshot, "指标快照");
    }
    Ok(())
}

/// stdout 只承载结果 JSON，日志由订阅器写到 stderr
fn write_decision(out: &mut impl Write, decision: &Value) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, decision)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn read_scenario() -> Result<Scenario> {
    let raw = match std::env::args().nth(1) {
        Some(path) if path != "-" => {
            std::fs::read_to_string(&path).with_context(|| format!("无法读取场景文件 {path}"))?
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("无法读取标准输入")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("场景 JSON 格式错误")
}

async fn evaluate(scenario: Scenario, config: &AppConfig) -> Result<Value> {
    let Scenario {
        client,
        contact,
        history,
        send_date,
        admit,
        filter,
        filter_context,
    } = scenario;

    let mut decision = serde_json::Map::new();

    if let Some(expression) = filter {
        let expression = match expression {
            Value::String(raw) => raw,
            other => other.to_string(),
        };
        let context = match filter_context {
            Some(value) => FilterContext::from_value(value),
            None => FilterContext::from_value(serde_json::to_value(&contact)?),
        };

        let mut helper = FilterHelper::new();
        let outcome = helper.filter(&expression, &context, true);
        let matched = matches!(outcome, Ok(true));
        decision.insert(
            "filter".to_string(),
            json!({
                "matched": matched,
                "error": outcome.as_ref().err().map(ToString::to_string),
                "diagnostics": helper.errors(),
            }),
        );

        if !matched {
            decision.insert("eligible".to_string(), json!(false));
            return Ok(Value::Object(decision));
        }
    }

    let store = Arc::new(MemoryCacheStore::with_entries(history));
    let eligibility = Eligibility::new(store, config.eligibility.clone());

    let result = if admit {
        eligibility.admit(&contact, &client, send_date).await
    } else {
        async {
            let ctx = eligibility.context(&contact, &client, send_date)?;
            eligibility.check_all(&contact, &client, &ctx).await?;
            Ok::<_, EligibilityError>(Vec::new())
        }
        .await
    };

    match result {
        Ok(entries) => {
            decision.insert("eligible".to_string(), json!(true));
            decision.insert("entries".to_string(), serde_json::to_value(entries)?);
        }
        Err(EligibilityError::Conflict(conflict)) => {
            decision.insert("eligible".to_string(), json!(false));
            decision.insert("conflict".to_string(), serde_json::to_value(conflict)?);
        }
        Err(err) => {
            decision.insert("eligible".to_string(), json!(false));
            decision.insert(
                "error".to_string(),
                json!({
                    "code": err.code(),
                    "message": err.to_string(),
                    "retryable": err.is_retryable(),
                }),
            );
        }
    }

    Ok(Value::Object(decision))
}
