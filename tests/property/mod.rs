mod catalog_properties;
mod model_properties;
