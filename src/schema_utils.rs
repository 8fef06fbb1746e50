// Schema lattice and argument checks shared by the slice operations.
use crate::data_item::DataItem;
use crate::data_slice::DataSlice;
use crate::dtype::DType;
use crate::error::{DataBagError, Result, invalid};
use crate::slice_impl::DataSliceImpl;

/// The least schema both `a` and `b` implicitly cast to. Missing acts as
/// "no schema yet". Entity schemas only combine with themselves and NONE.
pub fn common_schema(a: &DataItem, b: &DataItem) -> Result<DataItem> {
    if a.is_missing() || a == b {
        return Ok(b.clone());
    }
    if b.is_missing() {
        return Ok(a.clone());
    }
    let no_common = || DataBagError::NoCommonSchema {
        common: a.clone(),
        conflicting: b.clone(),
    };
    match (a, b) {
        (DataItem::DType(DType::None), other) | (other, DataItem::DType(DType::None)) if other.is_schema() => {
            Ok(other.clone())
        }
        (DataItem::DType(x), DataItem::DType(y)) => {
            let ys = y.upper_chain();
            x.upper_chain()
                .iter()
                .find(|dtype| ys.contains(dtype))
                .map(|dtype| DataItem::DType(*dtype))
                .ok_or_else(no_common)
        }
        _ => Err(no_common()),
    }
}

/// Folds [`common_schema`] over `schemas`; missing when there are none.
pub fn common_schema_of<'a>(schemas: impl IntoIterator<Item = &'a DataItem>) -> Result<DataItem> {
    schemas
        .into_iter()
        .try_fold(DataItem::Missing, |acc, schema| common_schema(&acc, schema))
}

pub fn is_implicitly_castable_to(from: &DataItem, to: &DataItem) -> bool {
    common_schema(from, to).is_ok_and(|common| &common == to)
}

/// The schema implied by the values alone: the common dtype of the present
/// primitives, SCHEMA for dtype markers, NONE for no values. Missing when
/// the values hold object ids, whose schema is not in the data.
pub fn data_schema(values: &DataSliceImpl) -> DataItem {
    if values.is_empty_and_unknown() {
        return DataItem::DType(DType::None);
    }
    if !values.object_ids().is_empty() {
        return DataItem::Missing;
    }
    if values.has_dtype_items() {
        return if values.is_single_dtype() {
            DataItem::DType(DType::Schema)
        } else {
            DataItem::Missing
        };
    }
    let dtypes: Vec<DataItem> = values.primitive_dtypes().into_iter().map(DataItem::DType).collect();
    common_schema_of(&dtypes).unwrap_or_default()
}

/// For OBJECT and ANY slices, the schema of the data when it can be read
/// off the values; the slice schema otherwise.
pub fn narrowed_schema(slice: &DataSlice) -> DataItem {
    let schema = slice.schema();
    if schema.is_dtype(DType::Object) || schema.is_dtype(DType::Any) {
        let from_data = data_schema(&slice.to_impl());
        if from_data.has_value() {
            return from_data;
        }
    }
    schema.clone()
}

pub fn describe_slice_schema(slice: &DataSlice) -> String {
    let schema = slice.schema();
    if !(schema.is_dtype(DType::Object) || schema.is_dtype(DType::Any)) {
        return schema.to_string();
    }
    let values = slice.to_impl();
    let mut names: Vec<&str> = values.primitive_dtypes().iter().map(|dtype| dtype.name()).collect();
    if !values.object_ids().is_empty() {
        names.push("ITEMID");
    }
    if values.has_dtype_items() {
        names.push("DTYPE");
    }
    format!(
        "{} with {} of {} {}",
        schema,
        if slice.size() == 1 { "an item" } else { "items" },
        if values.is_mixed_dtype() { "types" } else { "type" },
        names.join(", ")
    )
}

fn expect_castable(arg_name: &str, arg: &DataSlice, target: DType, what: &str) -> Result<()> {
    if is_implicitly_castable_to(&narrowed_schema(arg), &DataItem::DType(target)) {
        return Ok(());
    }
    invalid(format!(
        "argument `{}` must be a slice of {}, got a slice of {}",
        arg_name,
        what,
        describe_slice_schema(arg)
    ))
}

pub fn expect_numeric(arg_name: &str, arg: &DataSlice) -> Result<()> {
    expect_castable(arg_name, arg, DType::Float64, "numeric values")
}

pub fn expect_integer(arg_name: &str, arg: &DataSlice) -> Result<()> {
    expect_castable(arg_name, arg, DType::Int64, "integer values")
}

pub fn expect_string(arg_name: &str, arg: &DataSlice) -> Result<()> {
    expect_castable(arg_name, arg, DType::Text, DType::Text.name())
}

pub fn expect_bytes(arg_name: &str, arg: &DataSlice) -> Result<()> {
    expect_castable(arg_name, arg, DType::Bytes, DType::Bytes.name())
}

/// `arg` must be a present rank 0 item of `expected`.
pub fn expect_present_scalar(arg_name: &str, arg: &DataSlice, expected: DType) -> Result<()> {
    if arg.rank() != 0 {
        return invalid(format!(
            "argument `{}` must be an item holding {}, got a slice of rank {} > 0",
            arg_name,
            expected,
            arg.rank()
        ));
    }
    if narrowed_schema(arg) != DataItem::DType(expected) {
        return invalid(format!(
            "argument `{}` must be an item holding {}, got an item of {}",
            arg_name,
            expected,
            describe_slice_schema(arg)
        ));
    }
    if arg.present_count() != 1 {
        return invalid(format!(
            "argument `{}` must be an item holding {}, got missing",
            arg_name, expected
        ));
    }
    Ok(())
}

/// All arguments must be text, or all bytes; empty arguments fit either.
pub fn expect_consistent_string_or_bytes(args: &[(&str, &DataSlice)]) -> Result<()> {
    let mut first_text: Option<&str> = None;
    let mut first_bytes: Option<&str> = None;
    for (name, arg) in args {
        let schema = narrowed_schema(arg);
        let is_text = is_implicitly_castable_to(&schema, &DataItem::DType(DType::Text));
        let is_bytes = is_implicitly_castable_to(&schema, &DataItem::DType(DType::Bytes));
        match (is_text, is_bytes) {
            (true, true) => continue,
            (false, false) => {
                return invalid(format!(
                    "argument `{}` must be a slice of either {} or {}, got a slice of {}",
                    name,
                    DType::Text,
                    DType::Bytes,
                    describe_slice_schema(arg)
                ));
            }
            (true, false) => {
                first_text.get_or_insert(name);
            }
            (false, true) => {
                first_bytes.get_or_insert(name);
            }
        }
    }
    if let (Some(text), Some(bytes)) = (first_text, first_bytes) {
        return invalid(format!(
            "mixing {} and {} arguments is not allowed, but `{}` contains {} and `{}` contains {}",
            DType::Text,
            DType::Bytes,
            text,
            DType::Text,
            bytes,
            DType::Bytes
        ));
    }
    Ok(())
}

/// Converts `item` to `dtype` along the implicit numeric casts. Items that
/// already fit, and missing items, pass through.
pub fn cast_item(item: &DataItem, dtype: DType) -> Result<DataItem> {
    let cast = match (item, dtype) {
        (DataItem::Int32(v), DType::Int64) => DataItem::Int64(*v as i64),
        (DataItem::Int32(v), DType::Float32) => DataItem::Float32(*v as f32),
        (DataItem::Int32(v), DType::Float64) => DataItem::Float64(*v as f64),
        (DataItem::Int64(v), DType::Float32) => DataItem::Float32(*v as f32),
        (DataItem::Int64(v), DType::Float64) => DataItem::Float64(*v as f64),
        (DataItem::Float32(v), DType::Float64) => DataItem::Float64(*v as f64),
        _ => {
            if item.is_missing() || item.primitive_dtype() == Some(dtype) || !dtype.is_primitive() {
                item.clone()
            } else {
                return invalid(format!("cannot cast {} to {}", item, dtype));
            }
        }
    };
    Ok(cast)
}
