//! GeoParquet 1.0 writer: the terminal step of the Output Merger (C8).
//! Schema is `feature_id`, `geometry` (WKB), then either a single JSON
//! `tags` column (compact mode) or one nullable column per projected key
//! (exploded mode).

use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{BinaryArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use geozero::{CoordDimensions, ToWkb};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use crate::config::OutputCompression;
use crate::error::{CoreError, Result};
use crate::filter::TagMap;
use crate::sinks::TagSchema;

pub struct GeoParquetSink {
    writer: Option<ArrowWriter<File>>,
    schema: Arc<Schema>,
    tag_schema: TagSchema,
    feature_id_buf: Vec<String>,
    geometry_buf: Vec<Vec<u8>>,
    tag_buf: Vec<Option<String>>,
    exploded_buf: Vec<Vec<Option<String>>>,
    geometry_types_seen: BTreeSet<&'static str>,
    batch_size: usize,
}

impl GeoParquetSink {
    pub fn new<P: AsRef<Path>>(
        path: P,
        tag_schema: TagSchema,
        compression: OutputCompression,
        row_group_size: usize,
    ) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(CoreError::Io)?;

        let mut fields = vec![
            Field::new("feature_id", DataType::Utf8, false),
            Field::new("geometry", DataType::Binary, false),
        ];
        match &tag_schema {
            TagSchema::Compact => fields.push(Field::new("tags", DataType::Utf8, false)),
            TagSchema::Exploded(keys) => {
                for key in keys {
                    fields.push(Field::new(key, DataType::Utf8, true));
                }
            }
        }
        let schema = Arc::new(Schema::new(fields));

        let geo_metadata = serde_json::json!({
            "version": "1.0.0",
            "primary_column": "geometry",
            "columns": {
                "geometry": {
                    "encoding": "WKB",
                    "geometry_types": ["Point", "LineString", "Polygon", "MultiPolygon"],
                    "crs": "EPSG:4326"
                }
            }
        })
        .to_string();

        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new("geo".to_string(), Some(geo_metadata))]))
            .set_compression(arrow_compression(compression))
            .set_max_row_group_size(row_group_size)
            .build();

        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        let exploded_buf = match &tag_schema {
            TagSchema::Compact => Vec::new(),
            TagSchema::Exploded(keys) => vec![Vec::new(); keys.len()],
        };

        Ok(Self {
            writer: Some(writer),
            schema,
            tag_schema,
            feature_id_buf: Vec::new(),
            geometry_buf: Vec::new(),
            tag_buf: Vec::new(),
            exploded_buf,
            geometry_types_seen: BTreeSet::new(),
            batch_size: row_group_size.max(1),
        })
    }

    pub fn add_feature(&mut self, feature_id: &str, geometry: &geo::Geometry<f64>, tags: &TagMap) -> Result<()> {
        let wkb = geometry
            .to_wkb(CoordDimensions::xy())
            .map_err(|e| CoreError::InvalidInput(format!("failed to encode geometry as WKB: {e}")))?;
        self.geometry_types_seen.insert(geometry_type_name(geometry));

        self.feature_id_buf.push(feature_id.to_string());
        self.geometry_buf.push(wkb);

        match &self.tag_schema {
            TagSchema::Compact => {
                let json = serde_json::to_string(tags)
                    .map_err(|e| CoreError::InvalidInput(format!("failed to encode tags: {e}")))?;
                self.tag_buf.push(Some(json));
            }
            TagSchema::Exploded(keys) => {
                for (idx, key) in keys.iter().enumerate() {
                    self.exploded_buf[idx].push(tags.get(key).cloned());
                }
            }
        }

        if self.feature_id_buf.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.feature_id_buf.is_empty() {
            return Ok(());
        }

        let mut arrays: Vec<Arc<dyn arrow_array::Array>> = Vec::new();
        arrays.push(Arc::new(StringArray::from(std::mem::take(&mut self.feature_id_buf))));
        arrays.push(Arc::new(BinaryArray::from_iter_values(
            std::mem::take(&mut self.geometry_buf),
        )));

        match &self.tag_schema {
            TagSchema::Compact => {
                arrays.push(Arc::new(StringArray::from(std::mem::take(&mut self.tag_buf))));
            }
            TagSchema::Exploded(_) => {
                for column in self.exploded_buf.iter_mut() {
                    arrays.push(Arc::new(StringArray::from(std::mem::take(column))));
                }
            }
        }

        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

fn geometry_type_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) | geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        _ => "GeometryCollection",
    }
}

fn arrow_compression(compression: OutputCompression) -> Compression {
    match compression {
        OutputCompression::Uncompressed => Compression::UNCOMPRESSED,
        OutputCompression::Snappy => Compression::SNAPPY,
        OutputCompression::Gzip => Compression::GZIP(GzipLevel::default()),
        OutputCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
    }
}
