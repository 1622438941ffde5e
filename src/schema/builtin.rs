//! Built-in document schemas.

use super::field::{FieldSpec, FieldType, ObjectShape};
use super::Schema;

pub const V1ALPHA2: &str = "rdtk.dev/v1alpha2";
pub const V1ALPHA4: &str = "rdtk.dev/v1alpha4";
pub const V1ALPHA5: &str = "rdtk.dev/v1alpha5";

/// Every schema registered by [`super::init`]
pub fn builtin_schemas() -> Vec<Schema> {
    vec![
        Schema::new(V1ALPHA2, "File", file_shape()),
        Schema::new(V1ALPHA2, "Record", record_shape()),
        Schema::new(V1ALPHA5, "Annotation", ObjectShape::closed(annotation_fields())),
        Schema::new(
            V1ALPHA5,
            "ArbitraryAnnotation",
            ObjectShape::open(annotation_fields()),
        ),
        Schema::new(
            V1ALPHA5,
            "AnnotationCommentedImagePixel",
            ObjectShape::closed(annotation_fields()).extend(vec![FieldSpec::required(
                "commented_image_pixel",
                FieldType::Object(commented_image_pixel_shape()),
            )]),
        ),
        Schema::new(
            V1ALPHA5,
            "AnnotationCommentedImageRectangularArea",
            ObjectShape::closed(annotation_fields()).extend(vec![FieldSpec::required(
                "commented_image_rectangular_area",
                FieldType::Object(commented_rectangular_area_shape()),
            )]),
        ),
        Schema::new(V1ALPHA4, "CommentedPoint", commented_point_shape()),
    ]
}

fn file_shape() -> ObjectShape {
    ObjectShape::open(vec![
        FieldSpec::required("record_id", FieldType::non_empty_string()),
        FieldSpec::required("path", FieldType::non_empty_string()),
        FieldSpec::optional("contents", FieldType::Dict),
    ])
}

fn record_shape() -> ObjectShape {
    ObjectShape::open(vec![FieldSpec::required(
        "record_id",
        FieldType::non_empty_string(),
    )])
}

fn annotation_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("annotation_id", FieldType::non_empty_string()),
        FieldSpec::required("generation", FieldType::int()),
        FieldSpec::required("record_id", FieldType::non_empty_string()),
        FieldSpec::optional("timestamp_from", FieldType::nullable(FieldType::Float)),
        FieldSpec::optional("timestamp_to", FieldType::nullable(FieldType::Float)),
        FieldSpec::optional("created_at", FieldType::nullable(FieldType::Float)),
        FieldSpec::optional("created_by", FieldType::nullable(FieldType::string())),
    ]
}

fn xy_shape() -> ObjectShape {
    ObjectShape::closed(vec![
        FieldSpec::required("x", FieldType::Float),
        FieldSpec::required("y", FieldType::Float),
    ])
}

fn commented_image_pixel_shape() -> ObjectShape {
    ObjectShape::closed(vec![
        FieldSpec::required("text", FieldType::string()),
        FieldSpec::required("frame_id", FieldType::non_negative_int()),
        FieldSpec::required("target_topic", FieldType::string()),
        FieldSpec::required("image_pixel", FieldType::Object(xy_shape())),
        FieldSpec::optional("instance_id", FieldType::nullable(FieldType::string())),
    ])
}

fn commented_rectangular_area_shape() -> ObjectShape {
    ObjectShape::closed(vec![
        FieldSpec::required("text", FieldType::string()),
        FieldSpec::required("frame_id", FieldType::non_negative_int()),
        FieldSpec::required("target_topic", FieldType::string()),
        FieldSpec::required("center", FieldType::Object(xy_shape())),
        FieldSpec::required(
            "size",
            FieldType::Object(ObjectShape::closed(vec![
                FieldSpec::required("width", FieldType::Float),
                FieldSpec::required("height", FieldType::Float),
            ])),
        ),
        FieldSpec::optional("instance_id", FieldType::nullable(FieldType::string())),
    ])
}

fn commented_point_shape() -> ObjectShape {
    ObjectShape::open(vec![
        FieldSpec::required("frame_id", FieldType::string()),
        FieldSpec::required(
            "point",
            FieldType::Object(ObjectShape::closed(vec![
                FieldSpec::required("x", FieldType::Float),
                FieldSpec::required("y", FieldType::Float),
                FieldSpec::required("z", FieldType::Float),
            ])),
        ),
    ])
}
