//! Dataset loading and structural validation.
//!
//! The full-model data provider: reads a [`MultiRegionData`] from JSON and
//! checks referential integrity eagerly so that partitioning and subproblem
//! construction never see a site that does not exist or a demand series of the
//! wrong length.

use crate::{CoreError, CoreResult, MultiRegionData};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load and validate a multi-region dataset from a JSON file.
pub fn load_full_dataset(path: impl AsRef<Path>) -> CoreResult<MultiRegionData> {
    let file = File::open(path.as_ref())?;
    let data: MultiRegionData = serde_json::from_reader(BufReader::new(file))?;
    validate(&data)?;
    Ok(data)
}

/// Validate referential integrity and value ranges of an in-memory dataset.
pub fn validate(data: &MultiRegionData) -> CoreResult<()> {
    if data.timesteps.is_empty() {
        return Err(CoreError::Validation(
            "dataset declares no timesteps".into(),
        ));
    }

    let sites: HashSet<&str> = data.sites.iter().map(|s| s.as_str()).collect();
    if sites.len() != data.sites.len() {
        return Err(CoreError::Validation("duplicate site names".into()));
    }

    for gen in &data.generators {
        if !sites.contains(gen.site.as_str()) {
            return Err(CoreError::Validation(format!(
                "generator '{}' references unknown site '{}'",
                gen.name, gen.site
            )));
        }
        if gen.p_max < 0.0 {
            return Err(CoreError::Validation(format!(
                "generator '{}' has negative capacity {}",
                gen.name, gen.p_max
            )));
        }
    }

    for demand in &data.demands {
        if !sites.contains(demand.site.as_str()) {
            return Err(CoreError::Validation(format!(
                "demand references unknown site '{}'",
                demand.site
            )));
        }
        if demand.series.len() != data.timesteps.len() {
            return Err(CoreError::Validation(format!(
                "demand series for '{}' has {} entries, expected {}",
                demand.site,
                demand.series.len(),
                data.timesteps.len()
            )));
        }
    }

    for line in &data.lines {
        for endpoint in [&line.site_in, &line.site_out] {
            if !sites.contains(endpoint.as_str()) {
                return Err(CoreError::Validation(format!(
                    "transmission line {} -> {} references unknown site '{}'",
                    line.site_in, line.site_out, endpoint
                )));
            }
        }
        if line.site_in == line.site_out {
            return Err(CoreError::Validation(format!(
                "transmission line connects site '{}' to itself",
                line.site_in
            )));
        }
        if line.capacity < 0.0 {
            return Err(CoreError::Validation(format!(
                "transmission line {} -> {} has negative capacity",
                line.site_in, line.site_out
            )));
        }
        if line.efficiency <= 0.0 || line.efficiency > 1.0 {
            return Err(CoreError::Validation(format!(
                "transmission line {} -> {} has efficiency {} outside (0, 1]",
                line.site_in, line.site_out, line.efficiency
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Demand, Generator, TransmissionLine};
    use std::io::Write;

    fn two_site_data() -> MultiRegionData {
        MultiRegionData {
            timesteps: vec![0],
            sites: vec!["North".into(), "South".into()],
            generators: vec![Generator {
                name: "gas_north".into(),
                site: "North".into(),
                p_max: 120.0,
                cost_linear: 30.0,
                cost_quadratic: 0.05,
            }],
            demands: vec![Demand {
                site: "South".into(),
                series: vec![40.0],
            }],
            lines: vec![TransmissionLine {
                site_in: "North".into(),
                site_out: "South".into(),
                commodity: "Elec".into(),
                stf: 2030,
                capacity: 100.0,
                efficiency: 1.0,
            }],
        }
    }

    #[test]
    fn valid_dataset_passes() {
        assert!(validate(&two_site_data()).is_ok());
    }

    #[test]
    fn unknown_site_in_line_rejected() {
        let mut data = two_site_data();
        data.lines[0].site_out = "West".into();
        let err = validate(&data).unwrap_err();
        assert!(err.to_string().contains("unknown site 'West'"));
    }

    #[test]
    fn demand_series_length_checked() {
        let mut data = two_site_data();
        data.demands[0].series = vec![40.0, 41.0];
        assert!(matches!(
            validate(&data),
            Err(CoreError::Validation(msg)) if msg.contains("expected 1")
        ));
    }

    #[test]
    fn efficiency_range_checked() {
        let mut data = two_site_data();
        data.lines[0].efficiency = 1.2;
        assert!(validate(&data).is_err());
    }

    #[test]
    fn json_roundtrip_through_file() {
        let data = two_site_data();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&data).unwrap()).unwrap();

        let loaded = load_full_dataset(file.path()).unwrap();
        assert_eq!(loaded.sites, data.sites);
        assert_eq!(loaded.lines.len(), 1);
        assert_eq!(loaded.demand_at("South", 0), 40.0);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            load_full_dataset(file.path()),
            Err(CoreError::Parse(_))
        ));
    }
}
