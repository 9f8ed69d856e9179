//! Demo data for empty installations
//!
//! Rows are written with `is_demo = true`, so they show on the globe but are
//! excluded from the active map view and from analytics.

use crate::sphere::action::{ActionType, CLIMATE_ACTIONS, STATUS_ACTIVE};
use crate::sphere::backend::Query;
use crate::sphere::community::{Visibility, COMMUNITIES};
use crate::sphere::context::SphereContext;
use crate::sphere::error::SphereResult;
use anyhow::Context as _;
use serde_json::{json, Value};
use tracing::info;

struct DemoCommunity {
    name: &'static str,
    description: &'static str,
    location_name: &'static str,
    latitude: f64,
    longitude: f64,
}

struct DemoAction {
    title: &'static str,
    description: &'static str,
    action_type: ActionType,
    latitude: f64,
    longitude: f64,
    location_name: &'static str,
    impact_co2_saved: f64,
}

const DEMO_COMMUNITIES: &[DemoCommunity] = &[
    DemoCommunity {
        name: "Asian Climate Action Alliance",
        description: "Climate action across Southeast Asia with a focus on renewable energy",
        location_name: "Jakarta, Indonesia",
        latitude: -6.2088,
        longitude: 106.8456,
    },
    DemoCommunity {
        name: "Indian Renewable Energy Network",
        description: "Renewable energy and reforestation projects in India",
        location_name: "New Delhi, India",
        latitude: 28.6139,
        longitude: 77.209,
    },
    DemoCommunity {
        name: "African Green Initiative",
        description: "Greening and sustainable waste management in Africa",
        location_name: "Lagos, Nigeria",
        latitude: 6.5244,
        longitude: 3.3792,
    },
    DemoCommunity {
        name: "Americas Climate Coalition",
        description: "Climate action and sustainable transport in the Americas",
        location_name: "São Paulo, Brazil",
        latitude: -23.5505,
        longitude: -46.6333,
    },
    DemoCommunity {
        name: "European Sustainability Forum",
        description: "Sustainability and energy efficiency in Europe",
        location_name: "Berlin, Germany",
        latitude: 52.52,
        longitude: 13.405,
    },
];

const DEMO_ACTIONS: &[DemoAction] = &[
    DemoAction {
        title: "Solar Panel Installation in Jakarta",
        description: "500 solar panels on commercial buildings",
        action_type: ActionType::Renewable,
        latitude: -6.2088,
        longitude: 106.8456,
        location_name: "Jakarta, Indonesia",
        impact_co2_saved: 500.0,
    },
    DemoAction {
        title: "Mangrove Restoration Project",
        description: "Restoring 50 hectares of mangrove forest",
        action_type: ActionType::Reforestation,
        latitude: -6.3,
        longitude: 106.9,
        location_name: "Tangerang, Indonesia",
        impact_co2_saved: 1200.0,
    },
    DemoAction {
        title: "Electric Bus Fleet Implementation",
        description: "Replacing 100 city buses with electric buses",
        action_type: ActionType::Transportation,
        latitude: -6.1,
        longitude: 106.7,
        location_name: "Jakarta, Indonesia",
        impact_co2_saved: 800.0,
    },
    DemoAction {
        title: "Wind Farm Development in Gujarat",
        description: "A 50 MW wind farm",
        action_type: ActionType::Renewable,
        latitude: 22.0,
        longitude: 72.0,
        location_name: "Gujarat, India",
        impact_co2_saved: 1500.0,
    },
    DemoAction {
        title: "Forest Conservation Initiative",
        description: "Protecting 100 hectares of tropical forest",
        action_type: ActionType::Reforestation,
        latitude: 28.6139,
        longitude: 77.209,
        location_name: "New Delhi, India",
        impact_co2_saved: 2000.0,
    },
    DemoAction {
        title: "Organic Farming Transition",
        description: "Moving 500 farmers to sustainable organic farming",
        action_type: ActionType::Agriculture,
        latitude: 26.0,
        longitude: 74.0,
        location_name: "Rajasthan, India",
        impact_co2_saved: 600.0,
    },
    DemoAction {
        title: "Solar Energy for Rural Villages",
        description: "Solar power for 20 remote villages",
        action_type: ActionType::Renewable,
        latitude: 6.5244,
        longitude: 3.3792,
        location_name: "Lagos, Nigeria",
        impact_co2_saved: 400.0,
    },
    DemoAction {
        title: "Sahel Reforestation Program",
        description: "Tree planting along the Sahel belt",
        action_type: ActionType::Reforestation,
        latitude: 14.0,
        longitude: 4.0,
        location_name: "Mali",
        impact_co2_saved: 3000.0,
    },
    DemoAction {
        title: "Plastic Waste Recycling Center",
        description: "Plastic recycling hub for West Africa",
        action_type: ActionType::Waste,
        latitude: 5.0,
        longitude: 1.0,
        location_name: "Ghana",
        impact_co2_saved: 300.0,
    },
    DemoAction {
        title: "Amazon Rainforest Protection",
        description: "Protecting 1000 hectares of Amazon rainforest",
        action_type: ActionType::Reforestation,
        latitude: -3.0,
        longitude: -60.0,
        location_name: "Amazon, Brazil",
        impact_co2_saved: 5000.0,
    },
    DemoAction {
        title: "Subway Expansion Project",
        description: "Extending the metro for sustainable transport",
        action_type: ActionType::Transportation,
        latitude: -23.5505,
        longitude: -46.6333,
        location_name: "São Paulo, Brazil",
        impact_co2_saved: 1200.0,
    },
    DemoAction {
        title: "Rooftop Gardens Initiative",
        description: "Green roofs on 100 city buildings",
        action_type: ActionType::Agriculture,
        latitude: -23.6,
        longitude: -46.5,
        location_name: "São Paulo Region",
        impact_co2_saved: 450.0,
    },
    DemoAction {
        title: "Wind Energy Expansion",
        description: "Offshore wind expansion in the North Sea",
        action_type: ActionType::Renewable,
        latitude: 54.0,
        longitude: 6.0,
        location_name: "North Sea",
        impact_co2_saved: 2500.0,
    },
    DemoAction {
        title: "Urban Forest Project",
        description: "Planting 100,000 trees across Berlin",
        action_type: ActionType::Reforestation,
        latitude: 52.52,
        longitude: 13.405,
        location_name: "Berlin, Germany",
        impact_co2_saved: 800.0,
    },
    DemoAction {
        title: "Circular Economy Hub",
        description: "Circular economy centre for manufacturing",
        action_type: ActionType::Waste,
        latitude: 51.5,
        longitude: 0.0,
        location_name: "London, UK",
        impact_co2_saved: 700.0,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedReport {
    pub communities: usize,
    pub actions: usize,
    /// Demo rows were already present; nothing was written
    pub skipped: bool,
}

/// Inserts the demo communities and climate actions once
pub async fn seed_demo_data(ctx: &SphereContext) -> SphereResult<SeedReport> {
    let user = ctx.require_user().await?;

    let existing: Vec<Value> = ctx
        .store
        .select(&Query::table(COMMUNITIES).eq("is_demo", true).limit(1))
        .await
        .context("failed to check for demo data")?
        .unwrap_or_default();
    if !existing.is_empty() {
        info!("[Seed] demo data already present");
        return Ok(SeedReport {
            skipped: true,
            ..SeedReport::default()
        });
    }

    let communities: Vec<Value> = DEMO_COMMUNITIES
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "description": c.description,
                "location_name": c.location_name,
                "latitude": c.latitude,
                "longitude": c.longitude,
                "visibility": Visibility::Public,
                "member_count": 0,
                "creator_id": user.id,
                "is_demo": true,
            })
        })
        .collect();
    let communities = ctx
        .store
        .insert(COMMUNITIES, communities)
        .await
        .context("failed to seed communities")?;

    let actions: Vec<Value> = DEMO_ACTIONS
        .iter()
        .map(|a| {
            json!({
                "title": a.title,
                "description": a.description,
                "action_type": a.action_type,
                "latitude": a.latitude,
                "longitude": a.longitude,
                "location_name": a.location_name,
                "impact_co2_saved": a.impact_co2_saved,
                "creator_id": user.id,
                "status": STATUS_ACTIVE,
                "is_demo": true,
            })
        })
        .collect();
    let actions = ctx
        .store
        .insert(CLIMATE_ACTIONS, actions)
        .await
        .context("failed to seed climate actions")?;

    info!(
        "[Seed] 🌍 seeded {} communities and {} climate actions",
        communities.len(),
        actions.len()
    );
    Ok(SeedReport {
        communities: communities.len(),
        actions: actions.len(),
        skipped: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::action::ActionService;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use crate::sphere::error::SphereError;
    use std::sync::Arc;

    #[tokio::test]
    async fn seeds_once_and_stays_off_the_active_map() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let ctx = SphereContext::from_backend(backend.clone(), TextGenerator::new(None));
        assert!(matches!(seed_demo_data(&ctx).await, Err(SphereError::Unauthenticated)));

        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let report = seed_demo_data(&ctx).await.unwrap();
        assert_eq!(report.communities, 5);
        assert_eq!(report.actions, 15);
        assert!(seed_demo_data(&ctx).await.unwrap().skipped);

        let actions = ActionService::new(ctx.clone());
        assert_eq!(actions.list_all().await.unwrap().len(), 15);
        assert!(actions.list_active().await.unwrap().is_empty());
    }
}
