//! Impact analytics
//!
//! Aggregates active, non-demo climate actions and non-demo communities into
//! the projection the exporters consume.

use crate::sphere::action::{ClimateAction, CLIMATE_ACTIONS, STATUS_ACTIVE};
use crate::sphere::backend::Query;
use crate::sphere::community::{Community, COMMUNITIES};
use crate::sphere::context::SphereContext;
use crate::sphere::error::SphereResult;
use crate::sphere::export::{ActionTypeShare, ExportData, MonthlyMetric, RegionalImpact, TotalImpact};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Trailing months in the monthly series, current month included
pub const MONTHS: u32 = 6;

/// kg of CO2 counted as one participant
pub const CO2_PER_PARTICIPANT: f64 = 20.0;

const UNKNOWN_REGION: &str = "Unknown";

/// Reads the live data and builds the report
pub async fn load_report(ctx: &SphereContext) -> SphereResult<ExportData> {
    let actions: Vec<ClimateAction> = ctx
        .fetch(
            &Query::table(CLIMATE_ACTIONS)
                .eq("status", STATUS_ACTIVE)
                .eq("is_demo", false),
        )
        .await?;
    let communities: Vec<Community> = match ctx
        .fetch(&Query::table(COMMUNITIES).eq("is_demo", false))
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[Analytics] communities unavailable, counting none: {}", e);
            Vec::new()
        }
    };
    Ok(build_report(&actions, &communities, Utc::now()))
}

pub fn build_report(actions: &[ClimateAction], communities: &[Community], now: DateTime<Utc>) -> ExportData {
    let actions: Vec<&ClimateAction> = actions.iter().filter(|a| a.is_live()).collect();
    let communities: Vec<&Community> = communities.iter().filter(|c| !c.is_demo).collect();
    let total_co2: f64 = actions.iter().map(|a| a.impact_co2_saved).sum();

    ExportData {
        metrics: monthly(&actions, now),
        regional: regional(&actions, &communities, total_co2),
        action_types: action_types(&actions),
        total_impact: TotalImpact {
            co2_reduction: total_co2,
            participants: (total_co2 / CO2_PER_PARTICIPANT).floor() as u64,
            communities: communities.iter().map(|c| c.id.as_str()).collect::<HashSet<_>>().len() as u64,
        },
    }
}

fn percent(part: f64, total: f64) -> u32 {
    if total > 0.0 {
        (part / total * 100.0).round() as u32
    } else {
        0
    }
}

fn region_of(location: Option<&str>) -> String {
    match location.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => UNKNOWN_REGION.to_string(),
    }
}

/// Regions in order of first appearance
fn regional(actions: &[&ClimateAction], communities: &[&Community], total_co2: f64) -> Vec<RegionalImpact> {
    let mut order: Vec<String> = Vec::new();
    let mut co2: HashMap<String, f64> = HashMap::new();
    for action in actions {
        let region = region_of(action.location_name.as_deref());
        if !co2.contains_key(&region) {
            order.push(region.clone());
        }
        *co2.entry(region).or_default() += action.impact_co2_saved;
    }

    let mut members: HashMap<String, HashSet<&str>> = HashMap::new();
    for community in communities {
        let region = region_of(community.location_name.as_deref());
        if co2.contains_key(&region) {
            members.entry(region).or_default().insert(community.id.as_str());
        }
    }

    order
        .into_iter()
        .map(|region| {
            let reduction = co2.get(&region).copied().unwrap_or_default();
            RegionalImpact {
                communities: members.get(&region).map(|s| s.len() as u64).unwrap_or(0),
                impact_percentage: percent(reduction, total_co2),
                co2_reduction: reduction,
                region,
            }
        })
        .collect()
}

fn capitalise(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// CO2 per action type, largest first
fn action_types(actions: &[&ClimateAction]) -> Vec<ActionTypeShare> {
    let mut totals: Vec<(&str, f64)> = Vec::new();
    for action in actions {
        let name = action.action_type.as_str();
        match totals.iter_mut().find(|(n, _)| *n == name) {
            Some((_, value)) => *value += action.impact_co2_saved,
            None => totals.push((name, action.impact_co2_saved)),
        }
    }
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    let sum: f64 = totals.iter().map(|(_, v)| v).sum();
    totals
        .into_iter()
        .map(|(name, value)| ActionTypeShare {
            name: capitalise(name),
            value,
            percentage: percent(value, sum),
        })
        .collect()
}

/// First day of the month `back` months before `now`
fn month_start(now: DateTime<Utc>, back: u32) -> Option<NaiveDate> {
    let index = now.year() * 12 + now.month0() as i32 - back as i32;
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)
}

fn created_month(action: &ClimateAction) -> Option<(i32, u32)> {
    let created = DateTime::parse_from_rfc3339(action.created_at.as_deref()?).ok()?;
    let created = created.with_timezone(&Utc);
    Some((created.year(), created.month()))
}

/// Six trailing months, oldest first; participants are distinct creators
fn monthly(actions: &[&ClimateAction], now: DateTime<Utc>) -> Vec<MonthlyMetric> {
    (0..MONTHS)
        .rev()
        .filter_map(|back| month_start(now, back))
        .map(|start| {
            let in_month: Vec<&&ClimateAction> = actions
                .iter()
                .filter(|a| created_month(a) == Some((start.year(), start.month())))
                .collect();
            let creators: HashSet<&str> = in_month.iter().filter_map(|a| a.creator_id.as_deref()).collect();
            MonthlyMetric {
                month: start.format("%b").to_string(),
                co2_reduction: in_month.iter().map(|a| a.impact_co2_saved).sum(),
                actions_completed: in_month.len() as u64,
                participants: creators.len() as u64,
            }
        })
        .collect()
}
