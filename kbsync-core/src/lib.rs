mod client;

pub use client::{
    ApiErrorClass, Document, DocumentMetadata, DocumentPage, KbError, KnowledgeBaseClient,
    KnowledgeBaseRef, RagIndexEntry, RagIndexList, RagIndexStatus,
};
pub use reqwest::StatusCode;
