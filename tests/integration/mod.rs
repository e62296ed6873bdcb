mod test_configuration;
mod test_event_pipeline;
mod test_recording_properties;
