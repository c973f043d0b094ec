pub mod etl_pipeline;
