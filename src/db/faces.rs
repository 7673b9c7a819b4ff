//! Face instances found by the enrichment capability.
//!
//! Instances are stored unclustered (`face_id` NULL). Grouping faces into
//! people is outside what the engine does.

use rusqlite::{Connection, Row};

use crate::enrichment::{BoundingBox, DetectedFace};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceInstance {
    pub instance_id: String,
    pub face_id: Option<String>,
    pub asset_id: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

fn row_to_instance(row: &Row) -> rusqlite::Result<FaceInstance> {
    let bbox_json: String = row.get(3)?;
    let bbox = serde_json::from_str(&bbox_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(FaceInstance {
        instance_id: row.get(0)?,
        face_id: row.get(1)?,
        asset_id: row.get(2)?,
        bbox,
        confidence: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0) as f32,
    })
}

pub struct FaceRepo<'c> {
    conn: &'c Connection,
}

impl<'c> FaceRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Replace every stored instance for `asset_id` with `faces`.
    pub fn replace_face_instances(&self, asset_id: &str, faces: &[DetectedFace]) -> Result<()> {
        self.conn
            .execute("DELETE FROM face_instances WHERE asset_id = ?", [asset_id])?;

        let mut stmt = self.conn.prepare(
            r#"
            INSERT INTO face_instances (instance_id, face_id, asset_id, bounding_box, confidence)
            VALUES (?, NULL, ?, ?, ?)
            "#,
        )?;
        for (i, face) in faces.iter().enumerate() {
            let bbox = serde_json::to_string(&face.bbox)?;
            stmt.execute(rusqlite::params![
                format!("{}#{}", asset_id, i),
                asset_id,
                bbox,
                face.confidence as f64,
            ])?;
        }
        Ok(())
    }

    pub fn faces_for_asset(&self, asset_id: &str) -> Result<Vec<FaceInstance>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT instance_id, face_id, asset_id, bounding_box, confidence
            FROM face_instances WHERE asset_id = ? ORDER BY instance_id
            "#,
        )?;
        let rows = stmt.query_map([asset_id], row_to_instance)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn clear_faces(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM face_instances; DELETE FROM face_groups;")?;
        Ok(())
    }
}
