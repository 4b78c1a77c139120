use anyhow::{bail, Result};
use arrow_schema::Schema;

use crate::column_buffer::dtype_from_arrow;

pub trait SchemaExt {
    fn project_by_name(&self, names: &[&str]) -> Result<Schema>;
    fn is_join_key_compatible(&self, names: &[&str], other: &Schema, other_names: &[&str]) -> Result<()>;
}

impl SchemaExt for Schema {
    fn project_by_name(&self, names: &[&str]) -> Result<Schema> {
        let fields = names.iter().map(|n| {
            self.field_with_name(n)
                .map(|f| f.clone())
                .map_err(|_| anyhow::anyhow!("Column '{}' not found", n))
        }).collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }

    /// Check that the named key columns of `self` and `other` can be joined
    /// column by column.
    fn is_join_key_compatible(&self, names: &[&str], other: &Schema, other_names: &[&str]) -> Result<()> {
        if names.len() != other_names.len() {
            bail!("Join keys differ in arity: {} vs {}", names.len(), other_names.len());
        }
        let left = self.project_by_name(names)?;
        let right = other.project_by_name(other_names)?;
        for (l, r) in left.fields().iter().zip(right.fields()) {
            let (ldt, _) = dtype_from_arrow(l.data_type())?;
            let (rdt, _) = dtype_from_arrow(r.data_type())?;
            if ldt.storage() != rdt.storage() {
                bail!(
                    "Key columns '{}' ({}) and '{}' ({}) are not comparable",
                    l.name(), ldt, r.name(), rdt
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Schema};

    #[test]
    fn test_project_by_name() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Float64, false),
        ]);
        let proj = schema.project_by_name(&["a"]).unwrap();
        assert_eq!(proj.fields().len(), 1);
        assert!(schema.project_by_name(&["missing"]).is_err());
    }

    #[test]
    fn test_key_compatibility() {
        let left = Schema::new(vec![
            Field::new("id", DataType::UInt32, false),
            Field::new("day", DataType::Date32, false),
        ]);
        let right = Schema::new(vec![
            Field::new("key", DataType::Int32, false),
            Field::new("ts", DataType::Int64, false),
        ]);
        // uint32 and int32 share storage
        assert!(left.is_join_key_compatible(&["id"], &right, &["key"]).is_ok());
        assert!(left.is_join_key_compatible(&["id", "day"], &right, &["key", "key"]).is_ok());
        assert!(left.is_join_key_compatible(&["day"], &right, &["ts"]).is_err());
        assert!(left.is_join_key_compatible(&["id"], &right, &["key", "ts"]).is_err());
    }
}
