//! Earth Engine expression graphs.
//!
//! Clipping and band selection are not evaluated here; they are recorded as function
//! invocations and evaluated by the service when the export runs.
use crate::error::ExportError;
use crate::geometry::{Geometry, Region};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ValueNode {
    ConstantValue(Value),
    FunctionInvocationValue(FunctionInvocation),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInvocation {
    pub function_name: String,
    pub arguments: BTreeMap<String, ValueNode>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Expression {
    pub result: String,
    pub values: BTreeMap<String, ValueNode>,
}

impl ValueNode {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::ConstantValue(value.into())
    }

    pub fn invoke<const N: usize>(function_name: &str, arguments: [(&str, ValueNode); N]) -> Self {
        Self::FunctionInvocationValue(FunctionInvocation {
            function_name: function_name.to_string(),
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }

    pub fn geometry(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Point(point) => Self::invoke(
                "GeometryConstructors.Point",
                [(
                    "coordinates",
                    Self::constant(json!([point.longitude(), point.latitude()])),
                )],
            ),
            // Bounds are lat/lon rectangles, so edges are planar rather than geodesic
            Geometry::Region(region) => Self::invoke(
                "GeometryConstructors.Polygon",
                [
                    (
                        "coordinates",
                        Self::constant(region.to_geojson()["coordinates"].clone()),
                    ),
                    ("geodesic", Self::constant(false)),
                ],
            ),
        }
    }
}

/// A reference to a server-side image and the bands it is known to carry.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    id: String,
    bands: Vec<String>,
    node: ValueNode,
}

impl Image {
    pub fn load(id: &str, bands: Vec<String>) -> Self {
        let node = ValueNode::invoke("Image.load", [("id", ValueNode::constant(id))]);
        Self {
            id: id.to_string(),
            bands,
            node,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn node(&self) -> &ValueNode {
        &self.node
    }

    pub fn clip(&self, geometry: &Geometry) -> Self {
        let node = ValueNode::invoke(
            "Image.clip",
            [
                ("input", self.node.clone()),
                ("geometry", ValueNode::geometry(geometry)),
            ],
        );
        Self {
            node,
            ..self.clone()
        }
    }

    /// Keeps `bands` in the given order. Every band must exist on the image.
    pub fn select(&self, bands: &[String]) -> Result<Self, ExportError> {
        let missing = bands
            .iter()
            .filter(|b| !self.bands.contains(b))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ExportError::MissingBands {
                image: self.id.clone(),
                missing,
            });
        }

        let node = ValueNode::invoke(
            "Image.select",
            [
                ("input", self.node.clone()),
                ("bandSelectors", ValueNode::constant(json!(bands))),
            ],
        );
        Ok(Self {
            id: self.id.clone(),
            bands: bands.to_vec(),
            node,
        })
    }

    pub fn clip_to_bounds_and_scale(&self, region: &Region, scale: f64) -> Self {
        let node = ValueNode::invoke(
            "Image.clipToBoundsAndScale",
            [
                ("input", self.node.clone()),
                ("geometry", ValueNode::geometry(&Geometry::Region(*region))),
                ("scale", ValueNode::constant(scale)),
            ],
        );
        Self {
            node,
            ..self.clone()
        }
    }

    pub fn to_expression(&self) -> Expression {
        Expression {
            result: "0".to_string(),
            values: BTreeMap::from([("0".to_string(), self.node.clone())]),
        }
    }
}
