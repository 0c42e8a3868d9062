//! Code for reading depth-damage curves from a CSV file.
use super::*;
use crate::asset::{CurveID, DamageCurveMap, DepthDamageCurve};
use crate::units::{Dimensionless, Metres};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

const DAMAGE_CURVES_FILE_NAME: &str = "damage_curves.csv";

#[derive(Debug, Deserialize, PartialEq)]
struct DamageCurvePointRaw {
    curve_id: String,
    depth: Metres,
    #[serde(deserialize_with = "deserialise_proportion")]
    fraction: Dimensionless,
}

/// Read depth-damage curves from the model directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
///
/// # Returns
///
/// The curves, keyed by curve ID, in the order they first appear in the file.
pub fn read_damage_curves(model_dir: &Path) -> Result<DamageCurveMap> {
    let file_path = model_dir.join(DAMAGE_CURVES_FILE_NAME);
    let points = read_csv(&file_path)?;
    read_damage_curves_from_iter(points).with_context(|| input_err_msg(&file_path))
}

fn read_damage_curves_from_iter<I>(iter: I) -> Result<DamageCurveMap>
where
    I: Iterator<Item = DamageCurvePointRaw>,
{
    let mut points_by_curve: IndexMap<CurveID, Vec<(Metres, Dimensionless)>> = IndexMap::new();
    for point in iter {
        points_by_curve
            .entry(point.curve_id.as_str().into())
            .or_default()
            .push((point.depth, point.fraction));
    }

    points_by_curve
        .into_iter()
        .map(|(id, mut points)| {
            points.sort_by(|a, b| a.0.value().total_cmp(&b.0.value()));
            let curve = DepthDamageCurve::new(points)
                .with_context(|| format!("Invalid depth-damage curve {id}"))?;
            Ok((id, Arc::new(curve)))
        })
        .try_collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn point(curve_id: &str, depth: f64, fraction: f64) -> DamageCurvePointRaw {
        DamageCurvePointRaw {
            curve_id: curve_id.into(),
            depth: Metres(depth),
            fraction: Dimensionless(fraction),
        }
    }

    #[test]
    fn test_read_damage_curves() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(DAMAGE_CURVES_FILE_NAME)).unwrap();
        writeln!(
            file,
            "curve_id,depth,fraction
residential,0.0,0.0
residential,1.5,0.6
commercial,0.2,0.1
residential,0.5,0.25"
        )
        .unwrap();

        let curves = read_damage_curves(dir.path()).unwrap();
        assert_eq!(curves.len(), 2);
        assert_eq!(
            curves["residential"].damage_fraction(Metres(0.5)),
            Dimensionless(0.25)
        );
        assert_eq!(curves["commercial"].domain_min(), Metres(0.2));
    }

    #[test]
    fn test_read_damage_curves_invalid() {
        // Fraction decreases with depth
        let points = [point("a", 0.0, 0.5), point("a", 1.0, 0.2)];
        let err = read_damage_curves_from_iter(points.into_iter()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid depth-damage curve a");

        // Repeated depth
        let points = [point("a", 0.0, 0.0), point("a", 0.0, 0.2)];
        assert!(read_damage_curves_from_iter(points.into_iter()).is_err());
    }

    #[test]
    fn test_read_damage_curves_fraction_out_of_range() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(DAMAGE_CURVES_FILE_NAME)).unwrap();
        writeln!(file, "curve_id,depth,fraction\na,0.0,1.5").unwrap();
        assert!(read_damage_curves(dir.path()).is_err());
    }
}
