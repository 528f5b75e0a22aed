use std::{io::Cursor, sync::Arc};

use axum::{
    extract::{Extension, Json, Multipart, Path, Query, State},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    http::{AppError, RequestError, auth::CurrentUser, svc::HttpEndpoint},
    photo::PhotoUpload,
    task::enrichment_status,
};
use api::{
    photo::{
        DeletePhotoResp, EditPhotoReq, EditPhotoResp, GenerateTagsResp, GetPhotoResp, PhotoUuid,
        UpdatePhotoReq, UpdatePhotoResp, UploadPhotoResp,
    },
    search::PhotoFilter,
};

// http api endpoints
//
// each handler is a thin shim over one photo service message; ownership and
// every other policy decision lives in the photo service, so the only thing
// checked here is that the request is well-formed

// the last second of a calendar day, relative to its first
const END_OF_DAY_SECS: i64 = 24 * 60 * 60 - 1;

#[instrument(skip_all)]
pub(super) async fn upload_photo(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| RequestError::BadRequest(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_owned();
        let mime = field.content_type().map(str::to_owned);

        // the whole part has to be read before it can cross the service
        // boundary, since the field borrows the request body
        let bytes = field
            .bytes()
            .await
            .map_err(|err| RequestError::BadRequest(err.to_string()))?;

        debug!({ filename = filename, size = bytes.len() }, "received upload");

        let upload = PhotoUpload {
            filename,
            mime,
            stream: Box::new(Cursor::new(bytes)),
        };

        let outcome = state
            .photos
            .upload_photo(current_user.uid.clone(), upload)
            .await?;

        return Ok(Json(UploadPhotoResp {
            photo: outcome.record,
            enrichment_scheduled: outcome.enrichment.is_some(),
        })
        .into_response());
    }

    Err(RequestError::BadRequest(String::from("no file uploaded")).into())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SearchQuery {
    page: Option<u64>,
    limit: Option<u64>,
    q: Option<String>,
    tag: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl SearchQuery {
    fn into_filter(self) -> Result<PhotoFilter, RequestError> {
        let defaults = PhotoFilter::default();

        Ok(PhotoFilter {
            query: self.q.unwrap_or_default(),
            tag: self.tag,
            start: parse_date_query(self.start_date.as_deref().unwrap_or_default(), false)?,
            end: parse_date_query(self.end_date.as_deref().unwrap_or_default(), true)?,
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
        .normalized())
    }
}

// unix time for a date filter
//
// accepts a full rfc 3339 timestamp or a bare YYYY-MM-DD in server local time;
// a bare end date covers the whole of that day
pub(super) fn parse_date_query(value: &str, end_of_day: bool) -> Result<Option<i64>, RequestError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(datetime.timestamp()));
    }

    let invalid = || RequestError::BadRequest(format!("invalid date format: {value}"));

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .ok_or_else(invalid)?
        .timestamp();

    if end_of_day {
        Ok(Some(midnight + END_OF_DAY_SECS))
    } else {
        Ok(Some(midnight))
    }
}

#[instrument(skip_all)]
pub(super) async fn search_photos(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, AppError> {
    let filter = query.into_filter()?;

    let result = state
        .photos
        .search_photos(current_user.uid.clone(), filter)
        .await?;

    Ok(Json(result).into_response())
}

#[instrument(skip_all)]
pub(super) async fn get_photo(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(photo_uuid): Path<PhotoUuid>,
) -> Result<Response, AppError> {
    let photo = state
        .photos
        .get_photo(current_user.uid.clone(), photo_uuid)
        .await?;

    Ok(Json(GetPhotoResp { photo }).into_response())
}

#[instrument(skip_all)]
pub(super) async fn update_photo(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(photo_uuid): Path<PhotoUuid>,
    Json(message): Json<UpdatePhotoReq>,
) -> Result<Response, AppError> {
    let photo = state
        .photos
        .update_photo(current_user.uid.clone(), photo_uuid, message)
        .await?;

    Ok(Json(UpdatePhotoResp { photo }).into_response())
}

#[instrument(skip_all)]
pub(super) async fn delete_photo(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(photo_uuid): Path<PhotoUuid>,
) -> Result<Response, AppError> {
    state
        .photos
        .delete_photo(current_user.uid.clone(), photo_uuid)
        .await?;

    Ok(Json(DeletePhotoResp {}).into_response())
}

#[instrument(skip_all)]
pub(super) async fn edit_photo(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(photo_uuid): Path<PhotoUuid>,
    Json(message): Json<EditPhotoReq>,
) -> Result<Response, AppError> {
    let photo = state
        .photos
        .edit_photo(current_user.uid.clone(), photo_uuid, message)
        .await?;

    Ok(Json(EditPhotoResp { photo }).into_response())
}

#[instrument(skip_all)]
pub(super) async fn generate_tags(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(photo_uuid): Path<PhotoUuid>,
) -> Result<Response, AppError> {
    let photo = state
        .photos
        .generate_tags(current_user.uid.clone(), photo_uuid)
        .await?;

    Ok(Json(GenerateTagsResp { photo }).into_response())
}

#[instrument(skip_all)]
pub(super) async fn status(
    State(state): State<Arc<HttpEndpoint>>,
    Extension(_current_user): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    let status = enrichment_status(&state.task_sender).await?;

    Ok(Json(status).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_midnight(y: i32, m: u32, d: u32) -> i64 {
        let naive = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap().timestamp()
    }

    #[test]
    fn dates_parse_in_both_formats() {
        assert_eq!(parse_date_query("", false).unwrap(), None);
        assert_eq!(parse_date_query("   ", true).unwrap(), None);

        assert_eq!(
            parse_date_query("2024-03-01T12:00:00Z", false).unwrap(),
            Some(1709294400)
        );
        assert_eq!(
            parse_date_query("2024-03-01T12:00:00+02:00", true).unwrap(),
            Some(1709294400 - 7200)
        );

        let midnight = local_midnight(2024, 3, 1);
        assert_eq!(parse_date_query("2024-03-01", false).unwrap(), Some(midnight));
        assert_eq!(
            parse_date_query(" 2024-03-01 ", true).unwrap(),
            Some(midnight + END_OF_DAY_SECS)
        );
    }

    #[test]
    fn bad_dates_are_rejected() {
        for value in ["yesterday", "2024-13-01", "01/03/2024", "2024-03-01T25:00:00Z"] {
            assert!(matches!(
                parse_date_query(value, false),
                Err(RequestError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn search_query_becomes_filter() {
        let query = SearchQuery {
            page: Some(0),
            limit: Some(500),
            q: Some(String::from("  sunset ")),
            tag: Some(String::from(" ")),
            start_date: Some(String::from("2024-03-01")),
            end_date: None,
        };

        let filter = query.into_filter().unwrap();

        assert_eq!(filter.query, "sunset");
        assert_eq!(filter.tag, None);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.start, Some(local_midnight(2024, 3, 1)));
        assert_eq!(filter.end, None);

        let filter = SearchQuery::default().into_filter().unwrap();
        assert_eq!(filter, PhotoFilter::default());
    }
}
