#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use concert_scraper::apis::RssFeedSource;
    use concert_scraper::db::Store;
    use concert_scraper::resolver::event_must_exist;
    use concert_scraper::types::{parse_db_date, Venue};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Waldsee</title>
  <link>https://example.org</link>
  <description>Programm</description>
  <item>
    <title>Sommerfest</title>
    <guid>https://example.org/e/7</guid>
    <pubDate>Sat, 01 Jun 2030 16:00:00 GMT</pubDate>
    <description>"Trio Fatal" (Jazz, from Basel)</description>
  </item>
</channel></rss>"#;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("concerts.db");

        let source = RssFeedSource::new(
            "waldsee",
            "https://example.org/feed",
            Venue::new("Waldsee", "Waldseestraße 84"),
            "Konzert",
            chrono_tz::Europe::Berlin,
        );
        let mut events = source.parse_document(FEED.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);

        let event_id = {
            let store = Store::open(&path).unwrap();
            let mut event = events.remove(0);
            store
                .transaction(|tx| event_must_exist(tx, &mut event))
                .unwrap()
        };

        let store = Store::open(&path).unwrap();
        let (date, deleted) = store.event_status(event_id).unwrap().unwrap();
        assert_eq!(date, "2030-06-01 18:00:00.000+02:00");
        assert!(!deleted);
        assert_eq!(
            parse_db_date(&date).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 1, 16, 0, 0).unwrap()
        );
        assert_eq!(store.event_performers(event_id).unwrap(), vec!["Trio Fatal"]);

        let basel = store.find_performer("Trio Fatal", "Jazz").unwrap().unwrap();
        assert_eq!(basel.home, "Basel");
        assert!(basel.tags.contains("Basel"));
    }

    #[test]
    fn test_cleanup_after_the_fact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("concerts.db")).unwrap();
        let source = RssFeedSource::new(
            "waldsee",
            "https://example.org/feed",
            Venue::new("Waldsee", ""),
            "Konzert",
            chrono_tz::Europe::Berlin,
        );
        for mut event in source.parse_document(FEED.as_bytes()).unwrap() {
            store
                .transaction(|tx| event_must_exist(tx, &mut event))
                .unwrap();
        }

        let before = Utc.with_ymd_and_hms(2030, 6, 1, 15, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2030, 6, 1, 16, 0, 1).unwrap();
        assert_eq!(store.cleanup(before).unwrap(), 0);
        assert_eq!(store.cleanup(after).unwrap(), 1);
        assert_eq!(store.cleanup(after).unwrap(), 0);
    }
}
