//! Instance type metadata and pricing
//!
//! One `TypeInfo` per instance type, loaded once per region per tick and
//! treated as immutable afterwards. Spot prices come from a `PriceOracle`
//! so the history-fetching machinery stays outside the core.

use std::collections::HashMap;

/// Virtualization flavor of an instance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Virtualization {
    Hvm,
    Pv,
}

impl Virtualization {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hvm" => Some(Virtualization::Hvm),
            "paravirtual" | "pv" => Some(Virtualization::Pv),
            _ => None,
        }
    }
}

/// Network performance ladder, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetworkTier {
    Low,
    Moderate,
    High,
    TenGigabit,
    TwentyFiveGigabit,
}

impl NetworkTier {
    /// Parse the free-text performance strings the API reports. Unknown
    /// values map to `Low` so an unrecognized tier never inflates a
    /// candidate's capabilities.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "low" | "very low" | "low to moderate" => NetworkTier::Low,
            "moderate" => NetworkTier::Moderate,
            "high" => NetworkTier::High,
            "10 gigabit" | "up to 10 gigabit" => NetworkTier::TenGigabit,
            "25 gigabit" | "up to 25 gigabit" => NetworkTier::TwentyFiveGigabit,
            _ => NetworkTier::Low,
        }
    }
}

/// On-demand list price plus per-AZ spot prices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pricing {
    pub on_demand: f64,
    pub spot: HashMap<String, f64>,
}

/// Capability vector and pricing for one instance type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub instance_type: String,
    pub vcpu: i64,
    pub memory_gib: f64,
    pub instance_storage_gib: f64,
    pub gpu_count: i64,
    pub virtualization: Virtualization,
    pub ebs_only: bool,
    pub network: NetworkTier,
    pub pricing: Pricing,
}

impl TypeInfo {
    pub fn spot_price_in(&self, az: &str) -> Option<f64> {
        self.pricing.spot.get(az).copied()
    }
}

/// All instance types known in a region, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct TypeInfoTable {
    types: HashMap<String, TypeInfo>,
}

impl TypeInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: TypeInfo) {
        self.types.insert(info.instance_type.clone(), info);
    }

    pub fn get(&self, instance_type: &str) -> Option<&TypeInfo> {
        self.types.get(instance_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Fill in pricing for every type from the oracle, for the given AZs.
    /// Types the oracle knows no on-demand price for keep a zero price and
    /// are never picked as replacement candidates.
    pub fn with_pricing(mut self, oracle: &dyn PriceOracle, azs: &[String]) -> Self {
        for info in self.types.values_mut() {
            if let Some(od) = oracle.on_demand_price(&info.instance_type) {
                info.pricing.on_demand = od;
            }
            for az in azs {
                if let Some(price) = oracle.spot_price(&info.instance_type, az) {
                    info.pricing.spot.insert(az.clone(), price);
                }
            }
        }
        self
    }
}

/// Price source consumed by the type table builder. Production backs this
/// with spot price history plus a list price table; tests use a static map.
pub trait PriceOracle: Send + Sync {
    fn on_demand_price(&self, instance_type: &str) -> Option<f64>;
    fn spot_price(&self, instance_type: &str, az: &str) -> Option<f64>;
}

/// Map-backed oracle.
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    on_demand: HashMap<String, f64>,
    spot: HashMap<(String, String), f64>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_demand(mut self, instance_type: &str, price: f64) -> Self {
        self.on_demand.insert(instance_type.to_string(), price);
        self
    }

    pub fn spot(mut self, instance_type: &str, az: &str, price: f64) -> Self {
        self.spot
            .insert((instance_type.to_string(), az.to_string()), price);
        self
    }

    pub fn set_spot(&mut self, instance_type: &str, az: &str, price: f64) {
        self.spot
            .insert((instance_type.to_string(), az.to_string()), price);
    }

    /// Every AZ this oracle has at least one spot price for.
    pub fn spot_azs(&self) -> Vec<String> {
        let mut azs: Vec<String> = self.spot.keys().map(|(_, az)| az.clone()).collect();
        azs.sort();
        azs.dedup();
        azs
    }

    /// Seed on-demand prices from the built-in us-east-1 list price table.
    pub fn with_builtin_on_demand(mut self) -> Self {
        for (ty, price) in BUILTIN_ON_DEMAND_PRICES {
            self.on_demand.entry(ty.to_string()).or_insert(*price);
        }
        self
    }
}

impl PriceOracle for StaticPriceOracle {
    fn on_demand_price(&self, instance_type: &str) -> Option<f64> {
        self.on_demand.get(instance_type).copied()
    }

    fn spot_price(&self, instance_type: &str, az: &str) -> Option<f64> {
        self.spot
            .get(&(instance_type.to_string(), az.to_string()))
            .copied()
    }
}

/// Hourly on-demand list prices (us-east-1, may vary by region).
const BUILTIN_ON_DEMAND_PRICES: &[(&str, f64)] = &[
    ("t2.micro", 0.0116),
    ("t2.small", 0.023),
    ("t2.medium", 0.0464),
    ("t2.large", 0.0928),
    ("t3.micro", 0.0104),
    ("t3.small", 0.0208),
    ("t3.medium", 0.0416),
    ("t3.large", 0.0832),
    ("t3.xlarge", 0.1664),
    ("m4.large", 0.1),
    ("m4.xlarge", 0.2),
    ("m4.2xlarge", 0.4),
    ("m5.large", 0.096),
    ("m5.xlarge", 0.192),
    ("m5.2xlarge", 0.384),
    ("m5.4xlarge", 0.768),
    ("c4.large", 0.1),
    ("c4.xlarge", 0.199),
    ("c4.2xlarge", 0.398),
    ("c4.4xlarge", 0.796),
    ("c5.large", 0.085),
    ("c5.xlarge", 0.17),
    ("c5.2xlarge", 0.34),
    ("c5.4xlarge", 0.68),
    ("r4.large", 0.133),
    ("r4.xlarge", 0.266),
    ("r5.large", 0.126),
    ("r5.xlarge", 0.252),
    ("g4dn.xlarge", 0.526),
    ("g4dn.2xlarge", 0.752),
    ("p3.2xlarge", 3.06),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_tier_ordering() {
        assert!(NetworkTier::Low < NetworkTier::Moderate);
        assert!(NetworkTier::Moderate < NetworkTier::High);
        assert!(NetworkTier::High < NetworkTier::TenGigabit);
        assert!(NetworkTier::TenGigabit < NetworkTier::TwentyFiveGigabit);
    }

    #[test]
    fn network_tier_parses_api_strings() {
        assert_eq!(NetworkTier::parse("Moderate"), NetworkTier::Moderate);
        assert_eq!(NetworkTier::parse("10 Gigabit"), NetworkTier::TenGigabit);
        assert_eq!(NetworkTier::parse("25 Gigabit"), NetworkTier::TwentyFiveGigabit);
        assert_eq!(NetworkTier::parse("something new"), NetworkTier::Low);
    }

    #[test]
    fn pricing_decoration_fills_known_azs() {
        let mut table = TypeInfoTable::new();
        table.insert(TypeInfo {
            instance_type: "m5.large".to_string(),
            vcpu: 2,
            memory_gib: 8.0,
            instance_storage_gib: 0.0,
            gpu_count: 0,
            virtualization: Virtualization::Hvm,
            ebs_only: true,
            network: NetworkTier::High,
            pricing: Pricing::default(),
        });

        let oracle = StaticPriceOracle::new()
            .on_demand("m5.large", 0.096)
            .spot("m5.large", "us-east-1a", 0.031);
        let azs = vec!["us-east-1a".to_string(), "us-east-1b".to_string()];
        let table = table.with_pricing(&oracle, &azs);

        let info = table.get("m5.large").unwrap();
        assert_eq!(info.pricing.on_demand, 0.096);
        assert_eq!(info.spot_price_in("us-east-1a"), Some(0.031));
        assert_eq!(info.spot_price_in("us-east-1b"), None);
    }
}
