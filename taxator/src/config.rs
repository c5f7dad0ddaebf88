use std::{fs::File, io::BufReader, path::Path};

use forest::{
	approximation::ApproximationSettings,
	builder::MergingParameters,
	filters::{AspectRatio, Density, EllipseMatch, LargeGroups, PointSetFilter, SmallGroups, Threshold},
	fitting::{EllipseFitness, EvolutionSettings, Evolutionary},
};

use crate::Error;

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Error> {
	if !path.is_file() {
		return Err(Error::MissingInput(path.to_owned()));
	}
	let reader = BufReader::new(File::open(path)?);
	Ok(serde_json::from_reader(reader)?)
}

/// Defaults when no file is given.
pub fn read_or_default<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, Error> {
	match path {
		Some(path) => read_json(path),
		None => Ok(T::default()),
	}
}

fn ensure(condition: bool, message: &str) -> Result<(), Error> {
	if condition {
		Ok(())
	} else {
		Err(Error::InvalidConfiguration(message.into()))
	}
}

pub fn validate_merging(parameters: &MergingParameters) -> Result<(), Error> {
	ensure(parameters.slice_height > 0.0, "slice height must be positive")?;
	ensure(
		parameters.regression_distance > 0.0,
		"regression distance must be positive",
	)?;
	ensure(
		parameters.maximum_grouping_empty_height > 0.0,
		"maximum grouping empty height must be positive",
	)
}

pub fn validate_approximation(settings: &ApproximationSettings) -> Result<(), Error> {
	ensure(settings.slice_height > 0.0, "slice height must be positive")?;
	ensure(
		(0.0..=1.0).contains(&settings.minimum_valid_share),
		"minimum valid share must be between 0 and 1",
	)?;
	validate_evolution(&settings.evolution)
}

fn validate_evolution(settings: &EvolutionSettings) -> Result<(), Error> {
	ensure(settings.population > 0, "population must not be empty")?;
	ensure(settings.elite <= settings.population, "elite is larger than the population")?;
	ensure(
		0.0 < settings.minimum_radius
			&& settings
				.maximum_radius
				.map_or(true, |maximum| settings.minimum_radius <= maximum),
		"radius range is empty",
	)?;
	ensure(
		settings.maximum_offset.map_or(true, |offset| offset >= 0.0),
		"maximum offset must not be negative",
	)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SmallGroupsConfiguration {
	#[serde(default)]
	pub order: i32,
	pub minimal_size: Threshold,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LargeGroupsConfiguration {
	#[serde(default)]
	pub order: i32,
	pub maximal_size: Threshold,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct AspectRatioConfiguration {
	pub order: i32,
	pub minimum: f64,
	pub maximum: f64,
}

impl Default for AspectRatioConfiguration {
	fn default() -> Self {
		let filter = AspectRatio::default();
		Self {
			order: 0,
			minimum: filter.lower,
			maximum: filter.upper,
		}
	}
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DensityConfiguration {
	pub order: i32,
	/// Points per square meter.
	pub density: f64,
	pub mesh_width: f64,
}

impl Default for DensityConfiguration {
	fn default() -> Self {
		let filter = Density::default();
		Self {
			order: 0,
			density: filter.density,
			mesh_width: filter.mesh_width,
		}
	}
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct EllipseMatchConfiguration {
	pub order: i32,
	pub fitness_threshold: f64,
	pub eccentricity_threshold: f64,
	pub minimum_height: f64,
	pub fitness: EllipseFitness,
	pub evolution: EvolutionSettings,
}

impl Default for EllipseMatchConfiguration {
	fn default() -> Self {
		Self {
			order: 0,
			fitness_threshold: 0.2,
			eccentricity_threshold: 0.8,
			minimum_height: 0.1,
			fitness: EllipseFitness::default(),
			evolution: EvolutionSettings::default(),
		}
	}
}

/// Group filters, applied by ascending `order`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct FiltersConfiguration {
	pub small_groups: Option<SmallGroupsConfiguration>,
	pub large_groups: Option<LargeGroupsConfiguration>,
	pub aspect_ratio: Option<AspectRatioConfiguration>,
	pub density: Option<DensityConfiguration>,
	pub ellipse_match: Option<EllipseMatchConfiguration>,
}

impl FiltersConfiguration {
	pub fn validate(&self) -> Result<(), Error> {
		if let Some(aspect) = &self.aspect_ratio {
			ensure(aspect.minimum <= aspect.maximum, "aspect ratio range is empty")?;
		}
		if let Some(density) = &self.density {
			ensure(
				density.density > 0.0 && density.mesh_width > 0.0,
				"density and mesh width must be positive",
			)?;
		}
		if let Some(ellipse) = &self.ellipse_match {
			validate_evolution(&ellipse.evolution)?;
		}
		Ok(())
	}

	pub fn build(&self) -> Vec<Box<dyn PointSetFilter>> {
		let mut filters = Vec::new();
		let mut add = |order: i32, filter: Box<dyn PointSetFilter>| filters.push((order, filter));
		if let Some(config) = &self.small_groups {
			add(config.order, Box::new(SmallGroups { minimal_size: config.minimal_size }));
		}
		if let Some(config) = &self.large_groups {
			add(config.order, Box::new(LargeGroups { maximal_size: config.maximal_size }));
		}
		if let Some(config) = &self.aspect_ratio {
			add(
				config.order,
				Box::new(AspectRatio {
					lower: config.minimum,
					upper: config.maximum,
				}),
			);
		}
		if let Some(config) = &self.density {
			add(
				config.order,
				Box::new(Density {
					density: config.density,
					mesh_width: config.mesh_width,
				}),
			);
		}
		if let Some(config) = &self.ellipse_match {
			add(
				config.order,
				Box::new(EllipseMatch {
					optimizer: Evolutionary::new(config.evolution.clone()),
					fitness: config.fitness,
					eccentricity_threshold: config.eccentricity_threshold,
					fitness_threshold: config.fitness_threshold,
					minimum_height: config.minimum_height,
				}),
			);
		}
		filters.sort_by_key(|&(order, _)| order);
		filters.into_iter().map(|(_, filter)| filter).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_filters_follow_order() {
		let config: FiltersConfiguration = serde_json::from_str(
			r#"{
				"small_groups": { "order": 2, "minimal_size": { "kind": "constant", "value": 0.05 } },
				"aspect_ratio": { "order": 1, "minimum": 0.5, "maximum": 2.0 },
				"large_groups": { "order": 3, "maximal_size": { "kind": "linear", "slope": -0.02, "intercept": 1.2 } }
			}"#,
		)
		.unwrap();
		config.validate().unwrap();
		let names = config.build().iter().map(|filter| filter.name()).collect::<Vec<_>>();
		assert_eq!(names, ["aspect ratio", "small groups", "large groups"]);
	}

	#[test]
	fn test_empty_configuration() {
		let config: FiltersConfiguration = serde_json::from_str("{}").unwrap();
		assert!(config.build().is_empty());
	}

	#[test]
	fn test_partial_entries_use_defaults() {
		let config: FiltersConfiguration =
			serde_json::from_str(r#"{ "density": { "order": 4 }, "ellipse_match": {} }"#).unwrap();
		let density = config.density.as_ref().unwrap();
		assert_eq!(density.density, 20000.0);
		assert_eq!(config.ellipse_match.as_ref().unwrap().fitness_threshold, 0.2);
		assert_eq!(config.build().len(), 2);
	}

	#[test]
	fn test_invalid_values() {
		let config: FiltersConfiguration =
			serde_json::from_str(r#"{ "aspect_ratio": { "minimum": 1.5, "maximum": 1.0 } }"#).unwrap();
		assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));

		let merging = MergingParameters {
			slice_height: 0.0,
			..Default::default()
		};
		assert!(validate_merging(&merging).is_err());
		assert!(validate_merging(&MergingParameters::default()).is_ok());

		let mut approximation = ApproximationSettings::default();
		assert!(validate_approximation(&approximation).is_ok());
		approximation.evolution.elite = approximation.evolution.population + 1;
		assert!(validate_approximation(&approximation).is_err());

		let mut approximation = ApproximationSettings::default();
		approximation.evolution.maximum_radius = Some(0.005);
		assert!(validate_approximation(&approximation).is_err());
		approximation.evolution.maximum_radius = Some(1.2);
		assert!(validate_approximation(&approximation).is_ok());
	}

	#[test]
	fn test_unknown_threshold_kind() {
		let result = serde_json::from_str::<FiltersConfiguration>(
			r#"{ "small_groups": { "minimal_size": { "kind": "expression", "text": "z * 2" } } }"#,
		);
		assert!(result.is_err());
	}

	#[test]
	fn test_missing_file() {
		let result = read_json::<MergingParameters>(Path::new("/no/such/merging.json"));
		assert!(matches!(result, Err(Error::MissingInput(_))));
		let defaults = read_or_default::<MergingParameters>(None).unwrap();
		assert_eq!(defaults, MergingParameters::default());
	}
}
