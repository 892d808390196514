use super::{SampleReader, SensorError};

/// Entities the virtual load is composed from when no dedicated sensor exists
#[derive(Debug, Clone, Default)]
pub struct LoadSources {
    pub grid_entity: Option<String>,
    pub battery_power_entity: Option<String>,
    /// Set when the grid meter reports export as positive
    pub invert_grid: bool,
}

/// Derives the household's virtual load (W, negative = export).
pub struct LoadEstimator<'a> {
    reader: SampleReader<'a>,
    sources: &'a LoadSources,
}

impl<'a> LoadEstimator<'a> {
    pub fn new(reader: SampleReader<'a>, sources: &'a LoadSources) -> Self {
        Self { reader, sources }
    }

    /// Virtual load in watts.
    ///
    /// With a dedicated `virtual_load_entity` its value is used as-is and an
    /// unavailable reading yields `Ok(None)`. Otherwise the load is
    /// `grid (+/-) + battery`, where an unavailable component counts as zero.
    pub fn virtual_load_w(
        &self,
        virtual_load_entity: Option<&str>,
    ) -> Result<Option<f64>, SensorError> {
        if let Some(entity_id) = virtual_load_entity {
            return self.reader.number(entity_id);
        }
        Ok(Some(self.composed_load_w()?))
    }

    fn composed_load_w(&self) -> Result<f64, SensorError> {
        let mut grid_w = self
            .reader
            .number_or(self.sources.grid_entity.as_deref(), 0.0)?;
        let battery_w = self
            .reader
            .number_or(self.sources.battery_power_entity.as_deref(), 0.0)?;
        if self.sources.invert_grid {
            grid_w = -grid_w;
        }
        Ok(grid_w + battery_w)
    }
}
